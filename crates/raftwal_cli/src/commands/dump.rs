//! Dump command implementation.

use super::Format;
use raftwal_core::{scan_records, DamagedFrame, ScannedRecord, WalRecord};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

/// One record, summarized for output.
#[derive(Debug, Serialize)]
pub struct RecordInfo {
    /// Segment sequence number.
    pub segment: u64,
    /// Offset of the frame in the segment.
    pub offset: u64,
    /// Record type name.
    pub record_type: &'static str,
    /// Entry or snapshot index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
    /// Entry, snapshot or hard state term.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term: Option<u64>,
    /// Payload size for entries and metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_size: Option<usize>,
    /// Anything else worth showing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<ScannedRecord> for RecordInfo {
    fn from(scanned: ScannedRecord) -> Self {
        let mut info = Self {
            segment: scanned.segment,
            offset: scanned.offset,
            record_type: scanned.record.record_type().name(),
            index: None,
            term: None,
            data_size: None,
            detail: None,
        };
        match scanned.record {
            WalRecord::Checksum { crc } => info.detail = Some(format!("crc={crc:08x}")),
            WalRecord::Metadata(data) => info.data_size = Some(data.len()),
            WalRecord::HardState(state) => {
                info.term = Some(state.term);
                info.detail = Some(format!("vote={} commit={}", state.vote, state.commit));
            }
            WalRecord::Entry(entry) => {
                info.index = Some(entry.index);
                info.term = Some(entry.term);
                info.data_size = Some(entry.data.len());
            }
            WalRecord::Snapshot(snapshot) => {
                info.index = Some(snapshot.index);
                info.term = Some(snapshot.term);
            }
        }
        info
    }
}

/// Everything the dump found.
#[derive(Debug, Serialize)]
pub struct DumpResult {
    /// Records in log order.
    pub records: Vec<RecordInfo>,
    /// Frames that could not be decoded, one per affected segment.
    pub damaged: Vec<DamageInfo>,
}

/// A frame the dump stopped at.
#[derive(Debug, Serialize)]
pub struct DamageInfo {
    /// Segment sequence number.
    pub segment: u64,
    /// Offset of the frame.
    pub offset: u64,
    /// Bytes left in the segment from there.
    pub remaining: u64,
    /// Decode failure.
    pub reason: String,
}

impl From<DamagedFrame> for DamageInfo {
    fn from(frame: DamagedFrame) -> Self {
        Self {
            segment: frame.segment,
            offset: frame.offset,
            remaining: frame.remaining,
            reason: frame.reason,
        }
    }
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = collect(path, limit)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }

    Ok(())
}

/// Reads up to `limit` records from every segment in `path`.
pub fn collect(
    path: &Path,
    limit: Option<usize>,
) -> Result<DumpResult, Box<dyn std::error::Error>> {
    let mut records = Vec::new();
    let summary = scan_records(path, |scanned| {
        if limit.is_some_and(|max| records.len() >= max) {
            return Ok(false);
        }
        records.push(RecordInfo::from(scanned));
        Ok(true)
    })?;
    debug!(
        records = records.len(),
        damaged = summary.damaged.len(),
        "scan finished"
    );

    Ok(DumpResult {
        records,
        damaged: summary.damaged.into_iter().map(DamageInfo::from).collect(),
    })
}

fn print_text_output(result: &DumpResult) {
    println!(
        "{:<8} {:<10} {:<11} {:<10} {:<8} {:<8} DETAIL",
        "SEGMENT", "OFFSET", "TYPE", "INDEX", "TERM", "SIZE"
    );
    println!("{}", "-".repeat(72));

    for record in &result.records {
        println!(
            "{:<8} {:<10} {:<11} {:<10} {:<8} {:<8} {}",
            record.segment,
            record.offset,
            record.record_type,
            optional(record.index),
            optional(record.term),
            optional(record.data_size),
            record.detail.as_deref().unwrap_or("")
        );
    }

    println!();
    println!("Total: {} records", result.records.len());
    for damage in &result.damaged {
        println!(
            "Damaged frame in segment {} at offset {} ({} bytes to end): {}",
            damage.segment, damage.offset, damage.remaining, damage.reason
        );
    }
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
