//! On-disk segments.
//!
//! A log is a directory of segment files, each a [`SegmentHeader`] followed
//! by framed records (see [`crate::wal`]). Segment files are written once
//! at creation through a temporary file, then only appended to while they
//! are the active segment.

mod header;
mod store;

pub use header::{SegmentHeader, SEGMENT_HEADER_SIZE, SEGMENT_MAGIC, SEGMENT_VERSION};
pub use store::{Segment, SegmentInfo, SegmentStore};

/// Extension of sealed and active segment files.
pub const SEGMENT_SUFFIX: &str = ".wal";

/// Extension appended while a segment is being created.
pub const TEMP_SUFFIX: &str = ".tmp";
