//! # raftwal storage
//!
//! Byte-store backends that hold the contents of a single raftwal segment.
//!
//! A backend is an **opaque, append-only byte store**: it knows nothing about
//! segment headers, record frames or checksums. The core crate owns every
//! byte layout decision and talks to storage only through [`StorageBackend`].
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - one OS file per segment
//! - [`InMemoryBackend`] - for tests and for replaying hand-built segments
//!
//! ## Example
//!
//! ```rust
//! use raftwal_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
