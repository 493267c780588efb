//! Shared fixtures for the raftwal benchmarks.

use rand::Rng;
use raftwal_core::{Config, Entry, HardState, Wal};
use std::path::Path;

/// Generates random payload bytes of the given size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Builds `count` consecutive entries starting at `first_index`.
pub fn entries(first_index: u64, count: usize, payload_size: usize) -> Vec<Entry> {
    (0..count as u64)
        .map(|i| Entry::new(1, first_index + i, random_data(payload_size)))
        .collect()
}

/// Writes a log of `total` entries in batches of `batch`, without fsync.
pub fn populate(path: &Path, total: usize, batch: usize, payload_size: usize) {
    let config = Config::default().sync_on_save(false);
    let mut wal = Wal::create_with_config(path, b"bench", config).expect("create log");
    let mut next = 1u64;
    while (next as usize) <= total {
        let count = batch.min(total + 1 - next as usize);
        let batch = entries(next, count, payload_size);
        next += count as u64;
        wal.save(HardState::new(1, 1, next - 1), &batch)
            .expect("save batch");
    }
    wal.close().expect("close log");
}
