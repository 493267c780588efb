//! Append side of the log.

use crate::config::Config;
use crate::error::{WalError, WalResult};
use crate::segment::{Segment, SegmentHeader, SegmentStore};
use crate::types::{Entry, HardState, SnapshotBoundary};
use crate::wal::record::{encode_entry, encode_frame, encode_raw, RecordType, WalRecord};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Appends batches to the active segment and rotates it when full.
///
/// The writer owns the running checksum and the last index. Both only move
/// after a batch is fully written (and synced, if configured), so a failed
/// `save` leaves them where the last successful one put them.
pub struct WalWriter {
    active: Segment,
    metadata: Vec<u8>,
    crc: u32,
    last_index: u64,
    hard_state: HardState,
    segment_size: u64,
    sync_on_save: bool,
    warn_sync_duration: Duration,
    unusable: Option<String>,
}

impl WalWriter {
    /// Writes the first segment of a new log: checksum, metadata and the
    /// empty snapshot `{0, 0}`.
    pub fn initialize(store: &SegmentStore, metadata: Vec<u8>, config: &Config) -> WalResult<Self> {
        let mut preamble = Vec::new();
        let mut crc = encode_frame(&WalRecord::Checksum { crc: 0 }, 0, &mut preamble)?;
        crc = encode_raw(RecordType::Metadata, &metadata, crc, &mut preamble)?;
        crc = encode_frame(
            &WalRecord::Snapshot(SnapshotBoundary::default()),
            crc,
            &mut preamble,
        )?;

        let active = store.create_segment(SegmentHeader::new(0, 0), &preamble)?;
        Ok(Self::resume(
            active,
            metadata,
            crc,
            0,
            HardState::default(),
            config,
        ))
    }

    /// Continues a replayed log. `active` must end exactly at the last valid record.
    #[must_use]
    pub fn resume(
        active: Segment,
        metadata: Vec<u8>,
        crc: u32,
        last_index: u64,
        hard_state: HardState,
        config: &Config,
    ) -> Self {
        Self {
            active,
            metadata,
            crc,
            last_index,
            hard_state,
            segment_size: config.segment_size_bytes,
            sync_on_save: config.sync_on_save,
            warn_sync_duration: config.warn_sync_duration,
            unusable: None,
        }
    }

    /// Highest index the log covers.
    #[must_use]
    pub fn last_index(&self) -> u64 {
        self.last_index
    }

    /// Last hard state written.
    #[must_use]
    pub fn hard_state(&self) -> HardState {
        self.hard_state
    }

    /// Running checksum after the last record written.
    #[must_use]
    pub fn crc(&self) -> u32 {
        self.crc
    }

    /// Sequence number of the segment being appended to.
    #[must_use]
    pub fn active_segment(&self) -> u64 {
        self.active.seq()
    }

    /// Persists `entries` followed by `hard_state` as one append.
    ///
    /// # Errors
    ///
    /// - `NonMonotonicIndex` if the first entry is not `last_index + 1` or
    ///   the batch skips or repeats an index; nothing is written
    /// - `Unusable` if an earlier failure could not be rolled back
    /// - storage errors from the append or fsync; the segment is cut back
    ///   to where it was before the call
    pub fn save(
        &mut self,
        store: &SegmentStore,
        hard_state: HardState,
        entries: &[Entry],
    ) -> WalResult<()> {
        self.check_usable()?;

        let mut expected = self.last_index + 1;
        for entry in entries {
            if entry.index == u64::MAX {
                return Err(WalError::invalid_argument(format!(
                    "entry index {} leaves no room for a successor",
                    entry.index
                )));
            }
            if entry.index != expected {
                return Err(WalError::NonMonotonicIndex {
                    expected,
                    found: entry.index,
                });
            }
            expected += 1;
        }

        let mut buf = Vec::new();
        let mut crc = self.crc;
        for entry in entries {
            crc = encode_entry(entry, crc, &mut buf)?;
        }
        crc = encode_frame(&WalRecord::HardState(hard_state), crc, &mut buf)?;

        self.append_batch(&buf)?;

        self.crc = crc;
        self.last_index = expected - 1;
        self.hard_state = hard_state;
        debug!(
            segment = self.active.seq(),
            entries = entries.len(),
            last_index = self.last_index,
            bytes = buf.len(),
            "saved batch"
        );

        self.rotate_if_full(store);
        Ok(())
    }

    /// Records a snapshot boundary.
    ///
    /// A boundary past the last index moves the log forward: the next
    /// `save` must continue at `snapshot.index + 1`.
    pub fn save_snapshot(
        &mut self,
        store: &SegmentStore,
        snapshot: SnapshotBoundary,
    ) -> WalResult<()> {
        self.check_usable()?;
        if snapshot.index == u64::MAX {
            return Err(WalError::invalid_argument(format!(
                "snapshot index {} leaves no room for a successor",
                snapshot.index
            )));
        }

        let mut buf = Vec::new();
        let crc = encode_frame(&WalRecord::Snapshot(snapshot), self.crc, &mut buf)?;
        self.append_batch(&buf)?;

        self.crc = crc;
        self.last_index = self.last_index.max(snapshot.index);
        debug!(
            segment = self.active.seq(),
            index = snapshot.index,
            term = snapshot.term,
            "saved snapshot boundary"
        );

        self.rotate_if_full(store);
        Ok(())
    }

    /// Fsyncs the active segment, warning if it is slow.
    pub fn sync(&mut self) -> WalResult<()> {
        let started = Instant::now();
        self.active.sync()?;
        let took = started.elapsed();
        if took > self.warn_sync_duration {
            warn!(
                segment = self.active.seq(),
                took_ms = took.as_millis() as u64,
                expected_ms = self.warn_sync_duration.as_millis() as u64,
                "slow fsync"
            );
        }
        Ok(())
    }

    fn check_usable(&self) -> WalResult<()> {
        match &self.unusable {
            Some(message) => Err(WalError::unusable(message.clone())),
            None => Ok(()),
        }
    }

    /// Appends and syncs `buf`, cutting the segment back on failure.
    fn append_batch(&mut self, buf: &[u8]) -> WalResult<()> {
        let before = self.active.size()?;

        let result = self.active.append(buf).and_then(|_| {
            if self.sync_on_save {
                self.sync()
            } else {
                Ok(())
            }
        });

        let Err(err) = result else {
            return Ok(());
        };

        match self.active.truncate(before) {
            Ok(()) => {
                warn!(
                    segment = self.active.seq(),
                    offset = before,
                    error = %err,
                    "write failed, rolled back"
                );
            }
            Err(rollback) => {
                error!(
                    segment = self.active.seq(),
                    offset = before,
                    error = %err,
                    rollback_error = %rollback,
                    "write failed and could not be rolled back"
                );
                self.unusable = Some(format!(
                    "write at offset {before} of segment {} failed ({err}) and rollback failed ({rollback})",
                    self.active.seq()
                ));
            }
        }
        Err(err)
    }

    /// Rotation runs after the batch is durable, so its failure cannot fail
    /// the batch. The writer stops accepting appends instead; reopening the
    /// log resolves whichever state the directory was left in.
    fn rotate_if_full(&mut self, store: &SegmentStore) {
        let full = match self.active.size() {
            Ok(size) => size >= self.segment_size,
            Err(err) => {
                warn!(
                    segment = self.active.seq(),
                    error = %err,
                    "cannot read segment size, skipping rotation check"
                );
                false
            }
        };
        if !full {
            return;
        }
        if let Err(err) = self.rotate(store) {
            error!(segment = self.active.seq(), error = %err, "segment rotation failed");
            self.unusable = Some(format!("segment rotation failed: {err}"));
        }
    }

    /// Seals the active segment and starts the next one with checksum,
    /// metadata and the current hard state.
    pub fn rotate(&mut self, store: &SegmentStore) -> WalResult<()> {
        let next = self.active.header().next(self.last_index + 1);

        let mut preamble = Vec::new();
        let mut crc = encode_frame(&WalRecord::Checksum { crc: self.crc }, self.crc, &mut preamble)?;
        crc = encode_raw(RecordType::Metadata, &self.metadata, crc, &mut preamble)?;
        crc = encode_frame(&WalRecord::HardState(self.hard_state), crc, &mut preamble)?;

        store.rotate(&mut self.active, next, &preamble)?;
        self.crc = crc;
        Ok(())
    }

    /// Fsyncs the active segment and drops the writer.
    pub fn finish(mut self) -> WalResult<()> {
        if self.unusable.is_none() {
            self.sync()?;
        }
        Ok(())
    }
}
