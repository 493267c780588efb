//! Inspect command implementation.

use super::{CommandError, Format};
use raftwal_core::segment::SegmentStore;
use serde::Serialize;
use std::path::Path;

/// Directory listing result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Log directory.
    pub path: String,
    /// Segment files in sequence order.
    pub segments: Vec<SegmentStats>,
    /// Sum of all segment sizes in bytes.
    pub total_size: u64,
}

/// One segment file.
#[derive(Debug, Serialize)]
pub struct SegmentStats {
    /// Sequence number.
    pub seq: u64,
    /// Index of the first entry the segment may hold.
    pub first_index: u64,
    /// File size in bytes.
    pub size: u64,
    /// File name.
    pub file: String,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }

    Ok(())
}

/// Lists the segments in `path` without locking or reading their contents.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let store = SegmentStore::open_read_only(path)?;
    let infos = store.list_segments()?;
    if infos.is_empty() {
        return Err(CommandError::NoLog(path.to_path_buf()).into());
    }

    let mut segments = Vec::with_capacity(infos.len());
    for info in &infos {
        segments.push(SegmentStats {
            seq: info.header.seq,
            first_index: info.header.first_index,
            size: std::fs::metadata(&info.path)?.len(),
            file: info.header.file_name(),
        });
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        total_size: segments.iter().map(|s| s.size).sum(),
        segments,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("raftwal log inspection");
    println!("======================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Segments:");
    for segment in &result.segments {
        println!(
            "  #{:<6} first index {:<12} {:>10}  {}",
            segment.seq,
            segment.first_index,
            format_size(segment.size),
            segment.file
        );
    }
    println!();
    println!("Total: {} segments, {}", result.segments.len(), format_size(result.total_size));
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
