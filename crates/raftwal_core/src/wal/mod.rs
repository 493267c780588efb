//! Record format, replay and appends.
//!
//! ## Record Format
//!
//! ```text
//! | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! The checksum is chained: each record's crc32 is computed over
//! `type || payload` starting from the previous record's crc32, so a record
//! only validates in its original position. Every segment opens with a
//! checksum record carrying the running value, which lets a scan start at
//! any segment.
//!
//! | type | record   | payload                         |
//! |------|----------|---------------------------------|
//! | 1    | checksum | running crc (u32)               |
//! | 2    | metadata | opaque bytes, repeated per segment |
//! | 3    | hard state | term, vote, commit (u64 each) |
//! | 4    | entry    | term, index (u64 each), data    |
//! | 5    | snapshot | index, term (u64 each)          |
//!
//! ## Recovery Policy
//!
//! ### Tolerated (torn tail, discarded)
//!
//! In the **last** segment only, and only when no checksum-valid frame
//! follows it:
//!
//! - a frame header or payload cut short by end of file
//! - an unknown type byte (e.g. a zero-filled tail)
//! - a checksum mismatch on a frame that ends exactly at end of file
//!
//! These are writes interrupted before their fsync. In write mode the tail
//! is truncated before the first append.
//!
//! ### Fatal (replay fails, nothing is repaired)
//!
//! - any decode failure in a sealed segment
//! - a checksum mismatch with more data after the frame
//! - damage followed by a valid frame
//! - a valid checksum over a malformed payload
//! - an index that repeats or skips, conflicting metadata
//!
//! ## Invariants
//!
//! - Segments are append-only; the only rewrite is cutting a torn tail
//! - The running checksum and last index only advance after a batch is
//!   fully written
//! - Entry indexes are contiguous across the whole log

mod iterator;
mod record;
mod replay;
mod writer;

pub use iterator::{ReadOutcome, SegmentReader};
pub use record::{
    chain_crc, decode_frame, encode_entry, encode_frame, encode_raw, DecodedFrame, FrameError,
    RecordType, WalRecord, FRAME_CRC_SIZE, FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
pub use replay::{RecoveryStats, ReplayEngine, ReplayOutput, TornTail};
pub use writer::WalWriter;
