//! Read-only inspection of a log directory.
//!
//! Nothing here takes the directory lock or changes a file, so these can run
//! next to a live writer. A concurrent append may show up as a torn tail.

use crate::error::{WalError, WalResult};
use crate::segment::{SegmentHeader, SegmentStore};
use crate::types::{HardState, SnapshotBoundary};
use crate::wal::{ReadOutcome, RecoveryStats, ReplayEngine, SegmentReader, WalRecord};
use std::path::Path;

/// Outcome of [`verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// Segments that replay would read.
    pub segments: Vec<SegmentHeader>,
    /// Metadata written at creation.
    pub metadata: Vec<u8>,
    /// Last hard state in the log.
    pub hard_state: HardState,
    /// First entry after the boundary, if any.
    pub first_index: Option<u64>,
    /// Highest index the log covers.
    pub last_index: u64,
    /// Number of entries after the boundary.
    pub entry_count: u64,
    /// Replay counters, including any torn tail.
    pub stats: RecoveryStats,
}

/// Replays the log at `path` from `boundary` without modifying it.
///
/// Runs the same checks as [`Wal::read_all`](crate::Wal::read_all). A torn
/// tail is reported, not repaired.
///
/// # Errors
///
/// Any error `read_all` would return, plus `NotFound` for a missing log.
pub fn verify(path: &Path, boundary: SnapshotBoundary) -> WalResult<VerifyReport> {
    let store = SegmentStore::open_read_only(path)?;
    let all = store.list_segments()?;
    if all.is_empty() {
        return Err(WalError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let infos = SegmentStore::select(&all, boundary.index).ok_or(WalError::SnapshotNotFound {
        index: boundary.index,
    })?;

    let segments = store.open_for_scan(infos)?;
    let output = ReplayEngine::new(boundary).replay(&segments)?;

    Ok(VerifyReport {
        segments: infos.iter().map(|s| s.header).collect(),
        metadata: output.metadata,
        hard_state: output.hard_state,
        first_index: output.entries.first().map(|e| e.index),
        last_index: output.last_index,
        entry_count: output.entries.len() as u64,
        stats: output.stats,
    })
}

/// A record found by [`scan_records`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedRecord {
    /// Segment sequence number.
    pub segment: u64,
    /// Offset of the frame in the segment.
    pub offset: u64,
    /// The record.
    pub record: WalRecord,
}

/// A frame [`scan_records`] could not decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DamagedFrame {
    /// Segment sequence number.
    pub segment: u64,
    /// Offset of the frame in the segment.
    pub offset: u64,
    /// Bytes from the frame to the end of the segment.
    pub remaining: u64,
    /// What was wrong.
    pub reason: String,
}

/// Totals from [`scan_records`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Segments visited.
    pub segments: usize,
    /// Records handed to the visitor.
    pub records: u64,
    /// One entry per segment whose scan stopped early.
    pub damaged: Vec<DamagedFrame>,
}

/// Streams every record of every segment to `visitor`, in log order.
///
/// Each segment is checked on its own, anchored on its leading checksum
/// record, so damage in one segment does not hide the ones after it. No
/// index or metadata checks are made; use [`verify`] for those.
///
/// The visitor returns `Ok(false)` to stop early.
pub fn scan_records<F>(path: &Path, mut visitor: F) -> WalResult<ScanSummary>
where
    F: FnMut(ScannedRecord) -> WalResult<bool>,
{
    let store = SegmentStore::open_read_only(path)?;
    let infos = store.list_segments()?;
    let mut summary = ScanSummary::default();

    for info in &infos {
        let segment = store.open_segment(info)?;
        let mut reader = SegmentReader::new(&segment, 0)?;
        summary.segments += 1;

        loop {
            match reader.read_next()? {
                ReadOutcome::Record { offset, record } => {
                    if let WalRecord::Checksum { crc } = record {
                        reader.set_crc(crc);
                    }
                    summary.records += 1;
                    let keep_going = visitor(ScannedRecord {
                        segment: segment.seq(),
                        offset,
                        record,
                    })?;
                    if !keep_going {
                        return Ok(summary);
                    }
                }
                ReadOutcome::End => break,
                ReadOutcome::Failed { offset, error } => {
                    summary.damaged.push(DamagedFrame {
                        segment: segment.seq(),
                        offset,
                        remaining: reader.total_size() - offset,
                        reason: error.to_string(),
                    });
                    break;
                }
            }
        }
    }

    Ok(summary)
}
