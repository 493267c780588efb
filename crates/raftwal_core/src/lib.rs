//! # raftwal core
//!
//! Durable write-ahead log for a consensus-replicated state machine.
//!
//! This crate provides:
//! - [`Wal`]: create, open, replay once, then append entries and hard state
//! - Segment files with rotation and snapshot-based segment selection
//! - Chained checksums that tell a torn trailing write from corruption
//! - Read-only [`verify`] and [`scan_records`] for tooling
//!
//! The crate logs through `tracing` and never installs a subscriber.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dir;
mod error;
mod handle;
pub mod segment;
mod types;
mod verify;
pub mod wal;

pub use config::{Config, DEFAULT_SEGMENT_SIZE};
pub use error::{WalError, WalResult};
pub use handle::{Wal, WalState};
pub use types::{Entry, HardState, SnapshotBoundary};
pub use verify::{scan_records, verify, DamagedFrame, ScanSummary, ScannedRecord, VerifyReport};
pub use wal::{RecordType, RecoveryStats, TornTail, WalRecord};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
