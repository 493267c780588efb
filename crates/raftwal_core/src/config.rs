//! Log configuration.

use std::time::Duration;

/// Default rotation threshold for the active segment (64 MiB).
pub const DEFAULT_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;

/// Configuration for creating or opening a log.
///
/// The log directory itself is always passed to `create`/`open`; nothing in
/// here points at a global location.
#[derive(Debug, Clone)]
pub struct Config {
    /// Size after which the active segment is sealed and a new one started.
    ///
    /// Checked after each append, so a segment may exceed this by one batch.
    pub segment_size_bytes: u64,

    /// Whether every `save`/`save_snapshot` ends with an fsync.
    ///
    /// Turning this off gives up the durability guarantee of a successful
    /// return and is meant for tests and benchmarks.
    pub sync_on_save: bool,

    /// An fsync slower than this is logged as a warning.
    pub warn_sync_duration: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            segment_size_bytes: DEFAULT_SEGMENT_SIZE,
            sync_on_save: true,
            warn_sync_duration: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the segment rotation threshold.
    #[must_use]
    pub const fn segment_size_bytes(mut self, size: u64) -> Self {
        self.segment_size_bytes = size;
        self
    }

    /// Sets whether saves fsync before returning.
    #[must_use]
    pub const fn sync_on_save(mut self, value: bool) -> Self {
        self.sync_on_save = value;
        self
    }

    /// Sets the slow-fsync warning threshold.
    #[must_use]
    pub const fn warn_sync_duration(mut self, duration: Duration) -> Self {
        self.warn_sync_duration = duration;
        self
    }
}
