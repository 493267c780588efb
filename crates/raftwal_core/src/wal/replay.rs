//! Log replay.
//!
//! Streams the selected segments once, in order, and rebuilds metadata, the
//! last hard state and the entries after the snapshot boundary. The running
//! checksum and the end of valid data are handed on to the writer.

use crate::error::{WalError, WalResult};
use crate::segment::Segment;
use crate::types::{Entry, HardState, SnapshotBoundary};
use crate::wal::iterator::{ReadOutcome, SegmentReader};
use crate::wal::record::{FrameError, WalRecord};
use std::fmt;
use tracing::debug;

/// An incomplete trailing write that replay discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TornTail {
    /// Segment holding the torn record.
    pub segment: u64,
    /// Offset where the torn record starts (end of valid data).
    pub offset: u64,
    /// Bytes from `offset` to the end of the segment.
    pub discarded_bytes: u64,
}

impl fmt::Display for TornTail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "torn tail in segment {} at offset {} ({} bytes)",
            self.segment, self.offset, self.discarded_bytes
        )
    }
}

/// What a replay read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Number of segments scanned.
    pub segments_scanned: usize,
    /// Valid records read, of every type.
    pub records: u64,
    /// Entries returned (those after the snapshot boundary).
    pub entries: u64,
    /// The discarded torn tail, if there was one.
    pub torn_tail: Option<TornTail>,
}

/// Result of a successful replay.
#[derive(Debug, Clone)]
pub struct ReplayOutput {
    /// Metadata written at creation.
    pub metadata: Vec<u8>,
    /// Last hard state in the log.
    pub hard_state: HardState,
    /// Entries after the snapshot boundary, in index order.
    pub entries: Vec<Entry>,
    /// Running checksum at the end of valid data.
    pub crc: u32,
    /// Highest index the log covers, entries and snapshots alike.
    pub last_index: u64,
    /// End of valid data in the last segment.
    pub end_offset: u64,
    /// Counters and the torn tail.
    pub stats: RecoveryStats,
}

/// Rebuilds log state from segments, starting at a snapshot boundary.
#[derive(Debug, Clone, Copy)]
pub struct ReplayEngine {
    start: SnapshotBoundary,
}

#[derive(Default)]
struct ReplayState {
    metadata: Option<Vec<u8>>,
    hard_state: HardState,
    entries: Vec<Entry>,
    next_index: Option<u64>,
    snapshot_found: bool,
    anchored: bool,
}

impl ReplayEngine {
    /// Creates an engine replaying from `start`.
    #[must_use]
    pub const fn new(start: SnapshotBoundary) -> Self {
        Self { start }
    }

    /// Replays `segments`, which must be the selected segments in order.
    ///
    /// A damaged frame is tolerated only at the end of the last segment
    /// with nothing valid after it; it is reported in
    /// [`RecoveryStats::torn_tail`] and otherwise ignored.
    ///
    /// # Errors
    ///
    /// - `Corrupt`, `ChecksumMismatch`, `IndexGap`, `MetadataConflict` for damage
    /// - `SnapshotMismatch`, `SnapshotNotFound` if the boundary is not in the log
    pub fn replay(&self, segments: &[Segment]) -> WalResult<ReplayOutput> {
        let Some(last) = segments.last() else {
            return Err(WalError::invalid_argument("no segments to replay"));
        };

        let mut state = ReplayState::default();
        let mut stats = RecoveryStats::default();
        let mut crc = 0;
        let mut end_offset = last.data_start();

        for (i, segment) in segments.iter().enumerate() {
            let is_last = i + 1 == segments.len();
            let header = segment.header();

            // Replay may start in a rotated segment, whose first index is
            // where the log continues.
            if i == 0 && header.first_index > 0 {
                state.next_index = Some(header.first_index);
            }

            if i > 0 {
                if let Some(next) = state.next_index {
                    if header.first_index != next {
                        return Err(WalError::corrupt(
                            header.seq,
                            0,
                            format!(
                                "segment starts at index {} but the log continues at {next}",
                                header.first_index
                            ),
                        ));
                    }
                }
            }

            let mut reader = SegmentReader::new(segment, crc)?;
            loop {
                match reader.read_next()? {
                    ReadOutcome::Record { offset, record } => {
                        stats.records += 1;
                        self.apply(&mut state, &mut reader, header.seq, offset, record)?;
                    }
                    ReadOutcome::End => break,
                    ReadOutcome::Failed { offset, error } => {
                        stats.torn_tail = Some(classify(&reader, is_last, header.seq, offset, error)?);
                        break;
                    }
                }
            }

            crc = reader.crc();
            stats.segments_scanned += 1;
            if is_last {
                end_offset = reader.offset();
            }
            debug!(
                segment = header.seq,
                end = reader.offset(),
                "replayed segment"
            );
        }

        let Some(metadata) = state.metadata else {
            return Err(WalError::corrupt(
                segments[0].seq(),
                segments[0].data_start(),
                "log has no metadata record",
            ));
        };
        if !state.snapshot_found {
            return Err(WalError::SnapshotNotFound {
                index: self.start.index,
            });
        }

        let last_index = state
            .next_index
            .map_or(0, |n| n - 1)
            .max(self.start.index);
        stats.entries = state.entries.len() as u64;

        Ok(ReplayOutput {
            metadata,
            hard_state: state.hard_state,
            entries: state.entries,
            crc,
            last_index,
            end_offset,
            stats,
        })
    }

    fn apply(
        &self,
        state: &mut ReplayState,
        reader: &mut SegmentReader<'_>,
        segment: u64,
        offset: u64,
        record: WalRecord,
    ) -> WalResult<()> {
        match record {
            WalRecord::Checksum { crc } => {
                if !state.anchored {
                    reader.set_crc(crc);
                    state.anchored = true;
                } else if crc != reader.crc() {
                    return Err(WalError::ChecksumMismatch {
                        segment,
                        offset,
                        expected: crc,
                        actual: reader.crc(),
                    });
                }
            }
            WalRecord::Metadata(data) => match &state.metadata {
                Some(existing) if *existing != data => return Err(WalError::MetadataConflict),
                Some(_) => {}
                None => state.metadata = Some(data),
            },
            WalRecord::HardState(hs) => state.hard_state = hs,
            WalRecord::Entry(entry) => {
                let index = entry.index;
                let after = successor(segment, offset, index)?;
                match state.next_index {
                    Some(next) if index < next => {
                        return Err(WalError::corrupt(
                            segment,
                            offset,
                            format!("entry index {index} repeats, log already continues at {next}"),
                        ));
                    }
                    Some(next) if index > next => {
                        return Err(WalError::IndexGap {
                            expected: next,
                            found: index,
                        });
                    }
                    None if index > self.start.index.saturating_add(1) => {
                        return Err(WalError::IndexGap {
                            expected: self.start.index.saturating_add(1),
                            found: index,
                        });
                    }
                    _ => {}
                }
                state.next_index = Some(after);
                if index > self.start.index {
                    state.entries.push(entry);
                }
            }
            WalRecord::Snapshot(snap) => {
                if snap.index == self.start.index {
                    if snap.term != self.start.term {
                        return Err(WalError::SnapshotMismatch {
                            index: snap.index,
                            expected_term: self.start.term,
                            found_term: snap.term,
                        });
                    }
                    state.snapshot_found = true;
                }
                // A snapshot past the last entry moves the log forward; the
                // entries it covers are no longer contiguous with what follows.
                // An older snapshot never moves it back.
                let after = successor(segment, offset, snap.index)?;
                if state.next_index.map_or(true, |n| after > n) {
                    state.next_index = Some(after);
                    state.entries.retain(|e| e.index > snap.index);
                }
            }
        }
        Ok(())
    }
}

/// The index following `index`, or corruption if there is none.
fn successor(segment: u64, offset: u64, index: u64) -> WalResult<u64> {
    index
        .checked_add(1)
        .ok_or_else(|| WalError::corrupt(segment, offset, format!("index {index} overflows")))
}

/// Decides whether a frame that failed to decode is a torn write.
fn classify(
    reader: &SegmentReader<'_>,
    is_last: bool,
    segment: u64,
    offset: u64,
    error: FrameError,
) -> WalResult<TornTail> {
    let size = reader.total_size();
    let fatal = match &error {
        FrameError::Malformed(_) => true,
        FrameError::ChecksumMismatch { frame_len, .. } => {
            !is_last || offset + *frame_len as u64 != size
        }
        FrameError::Truncated | FrameError::UnknownType(_) => !is_last,
    };

    if fatal || reader.has_valid_successor(offset)? {
        return Err(frame_error(segment, offset, error));
    }

    Ok(TornTail {
        segment,
        offset,
        discarded_bytes: size - offset,
    })
}

fn frame_error(segment: u64, offset: u64, error: FrameError) -> WalError {
    match error {
        FrameError::ChecksumMismatch {
            stored, computed, ..
        } => WalError::ChecksumMismatch {
            segment,
            offset,
            expected: stored,
            actual: computed,
        },
        other => WalError::corrupt(segment, offset, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentHeader;
    use crate::wal::record::{encode_frame, FRAME_HEADER_SIZE};
    use raftwal_storage::InMemoryBackend;

    /// Builds in-memory segments the way the writer lays them out.
    struct LogBuilder {
        segments: Vec<(SegmentHeader, Vec<u8>)>,
        crc: u32,
        meta: Vec<u8>,
    }

    impl LogBuilder {
        fn new(meta: &[u8]) -> Self {
            let mut builder = Self {
                segments: Vec::new(),
                crc: 0,
                meta: meta.to_vec(),
            };
            builder.start_segment(0);
            builder.push(WalRecord::Snapshot(SnapshotBoundary::new(0, 0)));
            builder
        }

        fn start_segment(&mut self, first_index: u64) {
            let header = SegmentHeader::new(self.segments.len() as u64, first_index);
            self.segments.push((header, header.encode().to_vec()));
            self.push(WalRecord::Checksum { crc: self.crc });
            self.push(WalRecord::Metadata(self.meta.clone()));
        }

        fn push(&mut self, record: WalRecord) -> &mut Self {
            let data = &mut self.segments.last_mut().unwrap().1;
            self.crc = encode_frame(&record, self.crc, data).unwrap();
            self
        }

        fn entries(&mut self, term: u64, indexes: std::ops::RangeInclusive<u64>) -> &mut Self {
            for i in indexes {
                self.push(WalRecord::Entry(Entry::new(term, i, vec![i as u8; 8])));
            }
            self
        }

        fn tail(&mut self) -> &mut Vec<u8> {
            &mut self.segments.last_mut().unwrap().1
        }

        fn build(&self) -> Vec<Segment> {
            self.segments
                .iter()
                .map(|(h, data)| {
                    Segment::load(*h, Box::new(InMemoryBackend::with_data(data.clone()))).unwrap()
                })
                .collect()
        }
    }

    fn replay(log: &LogBuilder, start: SnapshotBoundary) -> WalResult<ReplayOutput> {
        ReplayEngine::new(start).replay(&log.build())
    }

    fn indexes(out: &ReplayOutput) -> Vec<u64> {
        out.entries.iter().map(|e| e.index).collect()
    }

    #[test]
    fn fresh_log() {
        let log = LogBuilder::new(b"meta");
        let out = replay(&log, SnapshotBoundary::default()).unwrap();

        assert_eq!(out.metadata, b"meta");
        assert_eq!(out.hard_state, HardState::default());
        assert!(out.entries.is_empty());
        assert_eq!(out.last_index, 0);
        assert_eq!(out.stats.records, 3);
        assert_eq!(out.stats.torn_tail, None);
    }

    #[test]
    fn entries_and_last_hard_state() {
        let mut log = LogBuilder::new(b"m");
        log.entries(1, 1..=3)
            .push(WalRecord::HardState(HardState::new(1, 1, 2)))
            .entries(2, 4..=5)
            .push(WalRecord::HardState(HardState::new(2, 1, 4)));

        let out = replay(&log, SnapshotBoundary::default()).unwrap();
        assert_eq!(indexes(&out), vec![1, 2, 3, 4, 5]);
        assert_eq!(out.hard_state, HardState::new(2, 1, 4));
        assert_eq!(out.last_index, 5);
        assert_eq!(out.end_offset, log.segments[0].1.len() as u64);
    }

    #[test]
    fn entries_across_segments() {
        let mut log = LogBuilder::new(b"m");
        log.entries(1, 1..=4);
        log.start_segment(5);
        log.push(WalRecord::HardState(HardState::new(1, 0, 4)));
        log.entries(1, 5..=9);

        let out = replay(&log, SnapshotBoundary::default()).unwrap();
        assert_eq!(indexes(&out), (1..=9).collect::<Vec<_>>());
        assert_eq!(out.stats.segments_scanned, 2);
        assert_eq!(out.crc, log.crc);
    }

    #[test]
    fn older_snapshot_at_start_of_rotated_segment() {
        let mut log = LogBuilder::new(b"m");
        log.entries(1, 1..=3)
            .push(WalRecord::Snapshot(SnapshotBoundary::new(1, 1)));
        log.start_segment(4);
        log.push(WalRecord::HardState(HardState::new(1, 0, 3)))
            .push(WalRecord::Snapshot(SnapshotBoundary::new(1, 1)))
            .entries(1, 4..=6)
            .push(WalRecord::Snapshot(SnapshotBoundary::new(5, 1)));

        // Only the rotated segment is selected for a boundary inside it.
        let segments = log.build();
        let out = ReplayEngine::new(SnapshotBoundary::new(5, 1))
            .replay(&segments[1..])
            .unwrap();
        assert_eq!(indexes(&out), vec![6]);
        assert_eq!(out.last_index, 6);

        let out = replay(&log, SnapshotBoundary::default()).unwrap();
        assert_eq!(indexes(&out), (1..=6).collect::<Vec<_>>());
    }

    #[test]
    fn rotated_segment_must_start_where_its_entries_do() {
        let mut log = LogBuilder::new(b"m");
        log.entries(1, 1..=3);
        log.start_segment(4);
        log.entries(1, 6..=7);

        let segments = log.build();
        assert!(matches!(
            ReplayEngine::new(SnapshotBoundary::new(4, 1)).replay(&segments[1..]),
            Err(WalError::IndexGap {
                expected: 4,
                found: 6
            })
        ));
    }

    #[test]
    fn index_overflow_is_corruption() {
        let mut log = LogBuilder::new(b"m");
        log.entries(1, 1..=2)
            .push(WalRecord::Snapshot(SnapshotBoundary::new(u64::MAX, 1)));

        assert!(matches!(
            replay(&log, SnapshotBoundary::default()),
            Err(WalError::Corrupt { segment: 0, .. })
        ));
    }

    #[test]
    fn boundary_skips_covered_entries() {
        let mut log = LogBuilder::new(b"m");
        log.entries(1, 1..=5)
            .push(WalRecord::Snapshot(SnapshotBoundary::new(3, 1)))
            .entries(1, 6..=7);

        let out = replay(&log, SnapshotBoundary::new(3, 1)).unwrap();
        assert_eq!(indexes(&out), vec![4, 5, 6, 7]);
        assert_eq!(out.last_index, 7);
    }

    #[test]
    fn boundary_term_must_match() {
        let mut log = LogBuilder::new(b"m");
        log.entries(1, 1..=5)
            .push(WalRecord::Snapshot(SnapshotBoundary::new(3, 1)));

        assert!(matches!(
            replay(&log, SnapshotBoundary::new(3, 2)),
            Err(WalError::SnapshotMismatch {
                index: 3,
                expected_term: 2,
                found_term: 1
            })
        ));
        assert!(matches!(
            replay(&log, SnapshotBoundary::new(4, 1)),
            Err(WalError::SnapshotNotFound { index: 4 })
        ));
    }

    #[test]
    fn snapshot_beyond_last_entry_moves_log_forward() {
        let mut log = LogBuilder::new(b"m");
        log.entries(1, 1..=2)
            .push(WalRecord::Snapshot(SnapshotBoundary::new(10, 3)))
            .entries(3, 11..=12);

        let out = replay(&log, SnapshotBoundary::default()).unwrap();
        assert_eq!(indexes(&out), vec![11, 12]);
        assert_eq!(out.last_index, 12);

        let out = replay(&log, SnapshotBoundary::new(10, 3)).unwrap();
        assert_eq!(indexes(&out), vec![11, 12]);
    }

    #[test]
    fn gap_is_fatal() {
        let mut log = LogBuilder::new(b"m");
        log.entries(1, 1..=2).entries(1, 4..=4);
        assert!(matches!(
            replay(&log, SnapshotBoundary::default()),
            Err(WalError::IndexGap {
                expected: 3,
                found: 4
            })
        ));
    }

    #[test]
    fn duplicate_is_fatal() {
        let mut log = LogBuilder::new(b"m");
        log.entries(1, 1..=3).entries(2, 3..=3);
        let err = replay(&log, SnapshotBoundary::default()).unwrap_err();
        assert!(matches!(err, WalError::Corrupt { .. }));
        assert!(err.is_corruption());
    }

    #[test]
    fn metadata_conflict() {
        let mut log = LogBuilder::new(b"m");
        log.push(WalRecord::Metadata(b"other".to_vec()));
        assert!(matches!(
            replay(&log, SnapshotBoundary::default()),
            Err(WalError::MetadataConflict)
        ));
    }

    #[test]
    fn torn_last_record_is_discarded() {
        let mut log = LogBuilder::new(b"m");
        log.entries(1, 1..=3);
        let valid_end = log.tail().len() as u64;
        let mut torn = Vec::new();
        encode_frame(&WalRecord::Entry(Entry::new(1, 4, vec![0; 64])), log.crc, &mut torn).unwrap();

        for cut in 1..torn.len() {
            let mut copy = LogBuilder {
                segments: log.segments.clone(),
                crc: log.crc,
                meta: log.meta.clone(),
            };
            copy.tail().extend_from_slice(&torn[..cut]);

            let out = replay(&copy, SnapshotBoundary::default()).unwrap();
            assert_eq!(indexes(&out), vec![1, 2, 3], "cut at {cut}");
            assert_eq!(out.end_offset, valid_end);
            assert_eq!(
                out.stats.torn_tail,
                Some(TornTail {
                    segment: 0,
                    offset: valid_end,
                    discarded_bytes: cut as u64
                })
            );
        }
    }

    #[test]
    fn corrupted_checksum_of_last_record_is_torn() {
        let mut log = LogBuilder::new(b"m");
        log.entries(1, 1..=3);
        let len = log.tail().len();
        log.tail()[len - 1] ^= 0xFF;

        let out = replay(&log, SnapshotBoundary::default()).unwrap();
        assert_eq!(indexes(&out), vec![1, 2]);
        assert!(out.stats.torn_tail.is_some());
    }

    #[test]
    fn corruption_followed_by_data_is_fatal() {
        let mut log = LogBuilder::new(b"m");
        log.entries(1, 1..=2);
        let damaged = log.tail().len();
        log.entries(1, 3..=5);
        log.tail()[damaged + FRAME_HEADER_SIZE + 20] ^= 0x01;

        let err = replay(&log, SnapshotBoundary::default()).unwrap_err();
        assert!(matches!(
            err,
            WalError::ChecksumMismatch { segment: 0, offset, .. } if offset == damaged as u64
        ));
    }

    #[test]
    fn torn_record_in_sealed_segment_is_fatal() {
        let mut log = LogBuilder::new(b"m");
        log.entries(1, 1..=2);
        let len = log.tail().len();
        log.tail().truncate(len - 3);
        log.start_segment(3);

        let err = replay(&log, SnapshotBoundary::default()).unwrap_err();
        assert!(matches!(err, WalError::Corrupt { segment: 0, .. }));
    }

    #[test]
    fn segment_checksum_must_continue_chain() {
        let mut log = LogBuilder::new(b"m");
        log.entries(1, 1..=2);
        log.crc ^= 1;
        log.start_segment(3);

        let err = replay(&log, SnapshotBoundary::default()).unwrap_err();
        assert!(matches!(err, WalError::ChecksumMismatch { segment: 1, .. }));
    }

    #[test]
    fn segment_first_index_must_continue_log() {
        let mut log = LogBuilder::new(b"m");
        log.entries(1, 1..=2);
        log.start_segment(5);

        let err = replay(&log, SnapshotBoundary::default()).unwrap_err();
        assert!(matches!(err, WalError::Corrupt { segment: 1, offset: 0, .. }));
    }

    #[test]
    fn scan_starting_mid_log_anchors_on_checksum_record() {
        let mut log = LogBuilder::new(b"m");
        log.entries(1, 1..=4)
            .push(WalRecord::Snapshot(SnapshotBoundary::new(4, 1)));
        log.start_segment(5);
        log.entries(1, 5..=6);

        let segments = log.build();
        let out = ReplayEngine::new(SnapshotBoundary::new(4, 1))
            .replay(&segments[1..])
            .unwrap_err();
        // The boundary record lives in the skipped segment.
        assert!(matches!(out, WalError::SnapshotNotFound { index: 4 }));

        let mut log = LogBuilder::new(b"m");
        log.entries(1, 1..=4);
        log.start_segment(5);
        log.push(WalRecord::Snapshot(SnapshotBoundary::new(4, 1)))
            .entries(1, 5..=6);
        let segments = log.build();
        let out = ReplayEngine::new(SnapshotBoundary::new(4, 1))
            .replay(&segments[1..])
            .unwrap();
        assert_eq!(indexes(&out), vec![5, 6]);
        assert_eq!(out.crc, log.crc);
    }

    #[test]
    fn missing_metadata_is_corruption() {
        let header = SegmentHeader::new(0, 0);
        let mut data = header.encode().to_vec();
        encode_frame(&WalRecord::Snapshot(SnapshotBoundary::default()), 0, &mut data).unwrap();
        let segments =
            vec![Segment::load(header, Box::new(InMemoryBackend::with_data(data))).unwrap()];

        let err = ReplayEngine::new(SnapshotBoundary::default())
            .replay(&segments)
            .unwrap_err();
        assert!(matches!(err, WalError::Corrupt { .. }));
    }
}
