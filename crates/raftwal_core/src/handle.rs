//! Log handle and session lifecycle.

use crate::config::Config;
use crate::error::{WalError, WalResult};
use crate::segment::{SegmentInfo, SegmentStore};
use crate::types::{Entry, HardState, SnapshotBoundary};
use crate::wal::{RecoveryStats, ReplayEngine, WalWriter};
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

/// What a handle can do right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalState {
    /// Opened; `read_all` must run before any append.
    Decoding,
    /// Replayed or freshly created; only appends are accepted.
    Encoding,
}

enum Mode {
    Decoding { segments: Vec<SegmentInfo> },
    Encoding(WalWriter),
}

/// An open write-ahead log.
///
/// A handle holds the directory's exclusive lock for its whole life. Each
/// session runs in two phases:
///
/// 1. [`open`](Self::open) selects the segments covering a snapshot
///    boundary; [`read_all`](Self::read_all) replays them exactly once.
/// 2. [`save`](Self::save) and [`save_snapshot`](Self::save_snapshot)
///    append. A handle from [`create`](Self::create) starts here.
///
/// [`close`](Self::close) consumes the handle, so a closed log cannot be used.
///
/// # Example
///
/// ```rust,no_run
/// use raftwal_core::{Entry, HardState, SnapshotBoundary, Wal};
/// use std::path::Path;
///
/// let dir = Path::new("raft-wal");
/// let mut wal = Wal::create(dir, b"node-1")?;
/// wal.save(HardState::new(1, 1, 1), &[Entry::new(1, 1, b"put x".to_vec())])?;
/// wal.close()?;
///
/// let mut wal = Wal::open(dir, SnapshotBoundary::default())?;
/// let (metadata, hard_state, entries) = wal.read_all()?;
/// assert_eq!(metadata, b"node-1");
/// assert_eq!(entries.len(), 1);
/// wal.save(hard_state, &[Entry::new(1, 2, b"put y".to_vec())])?;
/// wal.close()?;
/// # Ok::<(), raftwal_core::WalError>(())
/// ```
///
/// Calls are not synchronized: the caller serializes `save`s, which must
/// arrive in index order anyway.
pub struct Wal {
    store: SegmentStore,
    config: Config,
    start: SnapshotBoundary,
    mode: Mode,
    recovery: Option<RecoveryStats>,
}

impl Wal {
    /// Creates a new log in `path` with the default configuration.
    ///
    /// # Errors
    ///
    /// - `AlreadyExists` if `path` already holds a log
    /// - `Locked` if another handle holds the directory
    pub fn create(path: &Path, metadata: &[u8]) -> WalResult<Self> {
        Self::create_with_config(path, metadata, Config::default())
    }

    /// Creates a new log in `path`.
    ///
    /// The directory is created if needed. The first segment holds the
    /// metadata and the empty snapshot `{0, 0}`, and is durable when this
    /// returns. The handle is ready for appends.
    pub fn create_with_config(path: &Path, metadata: &[u8], config: Config) -> WalResult<Self> {
        let store = SegmentStore::create(path)?;
        let writer = WalWriter::initialize(&store, metadata.to_vec(), &config)?;

        info!(
            path = %path.display(),
            metadata_bytes = metadata.len(),
            "created log"
        );

        Ok(Self {
            store,
            config,
            start: SnapshotBoundary::default(),
            mode: Mode::Encoding(writer),
            recovery: None,
        })
    }

    /// Opens an existing log with the default configuration.
    pub fn open(path: &Path, snapshot: SnapshotBoundary) -> WalResult<Self> {
        Self::open_with_config(path, snapshot, Config::default())
    }

    /// Opens an existing log for replay from `snapshot`.
    ///
    /// Segments entirely before the boundary are skipped. Nothing is read
    /// beyond segment names until [`read_all`](Self::read_all).
    ///
    /// # Errors
    ///
    /// - `NotFound` if `path` does not exist or holds no segments
    /// - `Locked` if another handle holds the directory
    /// - `Corrupt` if segment sequence numbers are not contiguous
    /// - `SnapshotNotFound` if every segment starts after the boundary
    pub fn open_with_config(
        path: &Path,
        snapshot: SnapshotBoundary,
        config: Config,
    ) -> WalResult<Self> {
        let store = SegmentStore::open(path)?;
        let all = store.list_segments()?;
        if all.is_empty() {
            return Err(WalError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let segments = SegmentStore::select(&all, snapshot.index)
            .ok_or(WalError::SnapshotNotFound {
                index: snapshot.index,
            })?
            .to_vec();

        info!(
            path = %path.display(),
            index = snapshot.index,
            term = snapshot.term,
            segments = segments.len(),
            skipped = all.len() - segments.len(),
            "opened log"
        );

        Ok(Self {
            store,
            config,
            start: snapshot,
            mode: Mode::Decoding { segments },
            recovery: None,
        })
    }

    /// Replays the log and switches the handle to appends.
    ///
    /// Returns the metadata, the last hard state, and every entry after the
    /// snapshot boundary. A torn trailing record is cut off the last segment
    /// before this returns.
    ///
    /// # Errors
    ///
    /// - `DecoderUnavailable` if the session already replayed or was created
    /// - corruption and snapshot errors from replay; the handle then stays
    ///   in [`WalState::Decoding`] and `read_all` may be retried
    pub fn read_all(&mut self) -> WalResult<(Vec<u8>, HardState, Vec<Entry>)> {
        let Mode::Decoding { segments: infos } = &self.mode else {
            return Err(WalError::DecoderUnavailable);
        };

        let mut segments = self.store.open_for_scan(infos)?;
        let output = ReplayEngine::new(self.start).replay(&segments)?;
        let Some(mut active) = segments.pop() else {
            return Err(WalError::NotFound {
                path: self.store.path().to_path_buf(),
            });
        };

        if let Some(torn) = output.stats.torn_tail {
            active.truncate(output.end_offset)?;
            warn!(
                segment = torn.segment,
                offset = torn.offset,
                bytes = torn.discarded_bytes,
                "truncated torn tail"
            );
        }

        info!(
            segments = output.stats.segments_scanned,
            records = output.stats.records,
            entries = output.entries.len(),
            last_index = output.last_index,
            "replayed log"
        );

        let writer = WalWriter::resume(
            active,
            output.metadata.clone(),
            output.crc,
            output.last_index,
            output.hard_state,
            &self.config,
        );
        self.mode = Mode::Encoding(writer);
        self.recovery = Some(output.stats);

        Ok((output.metadata, output.hard_state, output.entries))
    }

    /// Appends `entries` and `hard_state`, durably if `sync_on_save` is set.
    ///
    /// # Errors
    ///
    /// - `NotReady` before `read_all`
    /// - `NonMonotonicIndex` if the batch does not continue the log
    /// - storage errors, after which nothing of this batch is in the log
    pub fn save(&mut self, hard_state: HardState, entries: &[Entry]) -> WalResult<()> {
        match &mut self.mode {
            Mode::Encoding(writer) => writer.save(&self.store, hard_state, entries),
            Mode::Decoding { .. } => Err(WalError::NotReady),
        }
    }

    /// Records that entries up to `snapshot.index` are covered by a snapshot.
    ///
    /// A later [`open`](Self::open) may start from this boundary.
    pub fn save_snapshot(&mut self, snapshot: SnapshotBoundary) -> WalResult<()> {
        match &mut self.mode {
            Mode::Encoding(writer) => writer.save_snapshot(&self.store, snapshot),
            Mode::Decoding { .. } => Err(WalError::NotReady),
        }
    }

    /// Current session phase.
    #[must_use]
    pub fn state(&self) -> WalState {
        match self.mode {
            Mode::Decoding { .. } => WalState::Decoding,
            Mode::Encoding(_) => WalState::Encoding,
        }
    }

    /// What the last successful `read_all` found, including any torn tail.
    #[must_use]
    pub fn recovery(&self) -> Option<&RecoveryStats> {
        self.recovery.as_ref()
    }

    /// Highest index in the log, once it is known.
    #[must_use]
    pub fn last_index(&self) -> Option<u64> {
        match &self.mode {
            Mode::Encoding(writer) => Some(writer.last_index()),
            Mode::Decoding { .. } => None,
        }
    }

    /// The log directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// The configuration the log was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Flushes the active segment and releases the directory lock.
    pub fn close(self) -> WalResult<()> {
        let Self { store, mode, .. } = self;
        if let Mode::Encoding(writer) = mode {
            writer.finish()?;
        }
        info!(path = %store.path().display(), "closed log");
        store.close()
    }
}

impl fmt::Debug for Wal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wal")
            .field("path", &self.store.path())
            .field("state", &self.state())
            .field("start", &self.start)
            .field("last_index", &self.last_index())
            .finish_non_exhaustive()
    }
}
