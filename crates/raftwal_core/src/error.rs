//! Error types for the write-ahead log.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for log operations.
pub type WalResult<T> = Result<T, WalError>;

/// Errors that can occur while creating, replaying or appending to a log.
///
/// Variants fall into four groups:
///
/// - **protocol misuse** ([`is_misuse`](Self::is_misuse)): returned before
///   anything is read or written
/// - **fatal corruption** ([`is_corruption`](Self::is_corruption)): the
///   on-disk log cannot be trusted past some point and is never auto-repaired
/// - **resource errors** (`Storage`, `Io`, `Locked`, ...): propagated
///   unchanged from the filesystem
/// - **snapshot errors**: the requested boundary does not exist in the log
///
/// A torn trailing record is not an error; see [`crate::TornTail`].
#[derive(Debug, Error)]
pub enum WalError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] raftwal_storage::StorageError),

    /// I/O error outside a storage backend (directory listing, rename, lock file).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// `create` found segments already present in the directory.
    #[error("log already exists at {}", path.display())]
    AlreadyExists {
        /// The log directory.
        path: PathBuf,
    },

    /// `open` found no directory or no segment files.
    #[error("no log found at {}", path.display())]
    NotFound {
        /// The log directory.
        path: PathBuf,
    },

    /// Another handle holds the exclusive lock on the directory.
    #[error("log directory {} is already in use", path.display())]
    Locked {
        /// The log directory.
        path: PathBuf,
    },

    /// `read_all` was called after it already succeeded in this session.
    #[error("no decoder available: read_all already completed for this session")]
    DecoderUnavailable,

    /// An append was attempted before the log was replayed.
    #[error("log is not ready for appends: call read_all first")]
    NotReady,

    /// A batch passed to `save` does not continue the log.
    #[error("entry index {found} does not continue the log, expected {expected}")]
    NonMonotonicIndex {
        /// The index the log expected next.
        expected: u64,
        /// The index that was supplied.
        found: u64,
    },

    /// Replay found a hole in the entry sequence.
    #[error("missing entries in log: expected index {expected}, found {found}")]
    IndexGap {
        /// The index replay expected next.
        expected: u64,
        /// The index that was found.
        found: u64,
    },

    /// The log is damaged at a point that cannot be a torn write.
    #[error("log corrupted in segment {segment} at offset {offset}: {message}")]
    Corrupt {
        /// Sequence number of the damaged segment.
        segment: u64,
        /// Byte offset of the damaged record inside the segment.
        offset: u64,
        /// Description of the damage.
        message: String,
    },

    /// A record's chained checksum failed and more data follows it.
    #[error(
        "checksum mismatch in segment {segment} at offset {offset}: stored {expected:08x}, computed {actual:08x}"
    )]
    ChecksumMismatch {
        /// Sequence number of the damaged segment.
        segment: u64,
        /// Byte offset of the damaged record inside the segment.
        offset: u64,
        /// Checksum stored in the record.
        expected: u32,
        /// Checksum computed while reading.
        actual: u32,
    },

    /// A metadata record differs from the first one in the log.
    #[error("conflicting metadata found in log")]
    MetadataConflict,

    /// The log records the boundary index with a different term.
    #[error("snapshot at index {index} has term {found_term}, expected {expected_term}")]
    SnapshotMismatch {
        /// Boundary index.
        index: u64,
        /// Term requested by the caller.
        expected_term: u64,
        /// Term recorded in the log.
        found_term: u64,
    },

    /// The log never recorded the requested boundary.
    #[error("snapshot boundary at index {index} not found in log")]
    SnapshotNotFound {
        /// Boundary index.
        index: u64,
    },

    /// An argument is outside what the on-disk format can hold.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// A previous write failed and could not be rolled back.
    #[error("log handle is unusable: {message}")]
    Unusable {
        /// What went wrong.
        message: String,
    },
}

impl WalError {
    /// Creates a corruption error.
    pub fn corrupt(segment: u64, offset: u64, message: impl Into<String>) -> Self {
        Self::Corrupt {
            segment,
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an unusable handle error.
    pub fn unusable(message: impl Into<String>) -> Self {
        Self::Unusable {
            message: message.into(),
        }
    }

    /// Returns true for damage that replay refuses to repair.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Corrupt { .. }
                | Self::ChecksumMismatch { .. }
                | Self::IndexGap { .. }
                | Self::MetadataConflict
        )
    }

    /// Returns true for calls made in the wrong session state or with a bad batch.
    ///
    /// These are returned before anything is read or written.
    #[must_use]
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::DecoderUnavailable | Self::NotReady | Self::NonMonotonicIndex { .. }
        )
    }
}
