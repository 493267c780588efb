//! Values persisted by the log.

use std::fmt;

/// One log entry.
///
/// `data` is opaque to the log; only `index` is interpreted, and only for
/// ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Entry {
    /// Consensus term in which the entry was proposed.
    pub term: u64,
    /// Position of the entry in the log.
    pub index: u64,
    /// Payload.
    pub data: Vec<u8>,
}

impl Entry {
    /// Creates a new entry.
    #[must_use]
    pub fn new(term: u64, index: u64, data: impl Into<Vec<u8>>) -> Self {
        Self {
            term,
            index,
            data: data.into(),
        }
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "entry(term={}, index={}, {} bytes)",
            self.term,
            self.index,
            self.data.len()
        )
    }
}

/// Latest voting and commitment state.
///
/// The log stores whatever it is given. It does not check that `commit`
/// is within the log or that `vote` is consistent with `term`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HardState {
    /// Current term.
    pub term: u64,
    /// Candidate voted for in `term`.
    pub vote: u64,
    /// Highest index known to be committed.
    pub commit: u64,
}

impl HardState {
    /// Creates a new hard state.
    #[must_use]
    pub const fn new(term: u64, vote: u64, commit: u64) -> Self {
        Self { term, vote, commit }
    }

    /// Returns true for the all-zero state of a fresh log.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.term == 0 && self.vote == 0 && self.commit == 0
    }
}

impl fmt::Display for HardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hard-state(term={}, vote={}, commit={})",
            self.term, self.vote, self.commit
        )
    }
}

/// Marker for the earliest entry the log is expected to still hold.
///
/// Entries up to and including `index` are covered by a snapshot kept
/// elsewhere.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SnapshotBoundary {
    /// Index of the last entry covered by the snapshot.
    pub index: u64,
    /// Term of that entry.
    pub term: u64,
}

impl SnapshotBoundary {
    /// Creates a new boundary.
    #[must_use]
    pub const fn new(index: u64, term: u64) -> Self {
        Self { index, term }
    }
}

impl fmt::Display for SnapshotBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snapshot(index={}, term={})", self.index, self.term)
    }
}
