//! Verify command implementation.

use super::{CommandError, Format};
use raftwal_core::{SnapshotBoundary, VerifyReport};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

/// Verification result, flattened for output.
#[derive(Debug, Serialize)]
pub struct VerifyResult {
    /// Log directory.
    pub path: String,
    /// Boundary the replay started from.
    pub snapshot_index: u64,
    /// Term of that boundary.
    pub snapshot_term: u64,
    /// Segments read.
    pub segments: usize,
    /// Records read.
    pub records: u64,
    /// Entries after the boundary.
    pub entries: u64,
    /// First entry after the boundary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_index: Option<u64>,
    /// Highest index the log covers.
    pub last_index: u64,
    /// Last hard state as `[term, vote, commit]`.
    pub hard_state: [u64; 3],
    /// Metadata size in bytes.
    pub metadata_bytes: usize,
    /// Torn tail that a writer would truncate, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub torn_tail: Option<TornTailInfo>,
}

/// Torn tail location.
#[derive(Debug, Serialize)]
pub struct TornTailInfo {
    /// Segment sequence number.
    pub segment: u64,
    /// Offset of the first discarded byte.
    pub offset: u64,
    /// Bytes that would be discarded.
    pub bytes: u64,
}

impl VerifyResult {
    fn new(path: &Path, boundary: SnapshotBoundary, report: &VerifyReport) -> Self {
        Self {
            path: path.display().to_string(),
            snapshot_index: boundary.index,
            snapshot_term: boundary.term,
            segments: report.stats.segments_scanned,
            records: report.stats.records,
            entries: report.entry_count,
            first_index: report.first_index,
            last_index: report.last_index,
            hard_state: [
                report.hard_state.term,
                report.hard_state.vote,
                report.hard_state.commit,
            ],
            metadata_bytes: report.metadata.len(),
            torn_tail: report.stats.torn_tail.map(|t| TornTailInfo {
                segment: t.segment,
                offset: t.offset,
                bytes: t.discarded_bytes,
            }),
        }
    }
}

/// Runs the verify command.
///
/// Fails with [`CommandError::VerifyFailed`] if replay would fail, so the
/// process exits non-zero.
pub fn run(
    path: &Path,
    boundary: SnapshotBoundary,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = check(path, boundary)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }

    Ok(())
}

/// Replays the log read-only from `boundary`.
pub fn check(path: &Path, boundary: SnapshotBoundary) -> Result<VerifyResult, CommandError> {
    let report = raftwal_core::verify(path, boundary).map_err(CommandError::VerifyFailed)?;
    debug!(
        segments = report.stats.segments_scanned,
        records = report.stats.records,
        last_index = report.last_index,
        "replay finished"
    );
    Ok(VerifyResult::new(path, boundary, &report))
}

fn print_text_output(result: &VerifyResult) {
    println!("Verifying log at {}", result.path);
    println!(
        "  from snapshot:  index {} term {}",
        result.snapshot_index, result.snapshot_term
    );
    println!("  segments read:  {}", result.segments);
    println!("  records read:   {}", result.records);
    match result.first_index {
        Some(first) => println!(
            "  entries:        {} ({}..={})",
            result.entries, first, result.last_index
        ),
        None => println!("  entries:        0"),
    }
    println!("  last index:     {}", result.last_index);
    let [term, vote, commit] = result.hard_state;
    println!("  hard state:     term {term} vote {vote} commit {commit}");
    println!("  metadata:       {} bytes", result.metadata_bytes);
    if let Some(torn) = &result.torn_tail {
        println!(
            "  torn tail:      segment {} offset {} ({} bytes)",
            torn.segment, torn.offset, torn.bytes
        );
    }
    println!();
    println!("✓ Log verification passed");
}
