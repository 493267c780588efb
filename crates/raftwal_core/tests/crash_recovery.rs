//! Crash recovery: torn tails are dropped, everything else is refused.

use raftwal_core::segment::SegmentHeader;
use raftwal_core::{Config, Entry, HardState, SnapshotBoundary, Wal, WalError, WalState};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const DATA_LEN: usize = 32;

/// type + length + term + index + data + crc
const ENTRY_FRAME_LEN: u64 = 5 + 16 + DATA_LEN as u64 + 4;

fn entry(index: u64) -> Entry {
    Entry::new(1, index, vec![index as u8; DATA_LEN])
}

fn segment_files(path: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(path)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "wal"))
        .collect();
    files.sort();
    files
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).unwrap().len()
}

fn append_bytes(path: &Path, bytes: &[u8]) {
    OpenOptions::new()
        .append(true)
        .open(path)
        .unwrap()
        .write_all(bytes)
        .unwrap();
}

fn replay(path: &Path) -> Result<(HardState, Vec<u64>), WalError> {
    let mut wal = Wal::open(path, SnapshotBoundary::default())?;
    let (_, state, entries) = wal.read_all()?;
    wal.close()?;
    Ok((state, entries.iter().map(|e| e.index).collect()))
}

#[test]
fn cut_anywhere_in_the_last_batch() {
    let source = tempdir().unwrap();
    let mut wal = Wal::create(source.path(), b"meta").unwrap();
    wal.save(HardState::new(1, 1, 2), &[entry(1), entry(2), entry(3)])
        .unwrap();
    let file = segment_files(source.path()).remove(0);
    let before = file_len(&file);
    wal.save(HardState::new(1, 1, 3), &[entry(4)]).unwrap();
    wal.close().unwrap();

    let full = fs::read(&file).unwrap();
    let name = file.file_name().unwrap().to_owned();

    for cut in before + 1..full.len() as u64 {
        let target = tempdir().unwrap();
        fs::write(target.path().join(&name), &full[..cut as usize]).unwrap();

        let mut wal = Wal::open(target.path(), SnapshotBoundary::default()).unwrap();
        let (_, state, entries) = wal.read_all().unwrap();
        let torn = wal.recovery().unwrap().torn_tail;
        assert_eq!(state, HardState::new(1, 1, 2));

        let kept = if cut < before + ENTRY_FRAME_LEN {
            assert_eq!(entries.len(), 3, "cut at {cut}");
            before
        } else {
            // The entry made it; only the hard state record is lost.
            assert_eq!(entries.len(), 4, "cut at {cut}");
            before + ENTRY_FRAME_LEN
        };
        match torn {
            Some(torn) => {
                assert_eq!(torn.offset, kept);
                assert_eq!(torn.discarded_bytes, cut - kept);
            }
            None => assert_eq!(cut, kept),
        }

        // The tail is gone from disk and the log keeps going.
        assert_eq!(file_len(&target.path().join(&name)), kept);
        let next = entries.len() as u64 + 1;
        wal.save(HardState::new(2, 1, 3), &[entry(next)]).unwrap();
        wal.close().unwrap();

        let (state, indexes) = replay(target.path()).unwrap();
        assert_eq!(state, HardState::new(2, 1, 3));
        assert_eq!(indexes, (1..=next).collect::<Vec<_>>());
    }
}

#[test]
fn zero_filled_tail_is_discarded() {
    let temp = tempdir().unwrap();
    let mut wal = Wal::create(temp.path(), b"meta").unwrap();
    wal.save(HardState::new(1, 0, 1), &[entry(1), entry(2)])
        .unwrap();
    wal.close().unwrap();

    let file = segment_files(temp.path()).remove(0);
    let size = file_len(&file);
    append_bytes(&file, &[0u8; 4096]);

    let mut wal = Wal::open(temp.path(), SnapshotBoundary::default()).unwrap();
    let (_, _, entries) = wal.read_all().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(
        wal.recovery().unwrap().torn_tail.unwrap().discarded_bytes,
        4096
    );
    wal.close().unwrap();
    assert_eq!(file_len(&file), size);
}

#[test]
fn corruption_mid_log_is_fatal_and_not_repaired() {
    let temp = tempdir().unwrap();
    let mut wal = Wal::create(temp.path(), b"meta").unwrap();
    wal.save(HardState::new(1, 0, 0), &[entry(1)]).unwrap();
    let file = segment_files(temp.path()).remove(0);
    let second = file_len(&file);
    wal.save(HardState::new(1, 0, 1), &[entry(2)]).unwrap();
    wal.save(HardState::new(1, 0, 2), &[entry(3)]).unwrap();
    wal.close().unwrap();

    let mut bytes = fs::read(&file).unwrap();
    bytes[second as usize + 30] ^= 0x40;
    fs::write(&file, &bytes).unwrap();

    let mut wal = Wal::open(temp.path(), SnapshotBoundary::default()).unwrap();
    let err = wal.read_all().unwrap_err();
    assert!(err.is_corruption());
    assert!(matches!(
        err,
        WalError::ChecksumMismatch { segment: 0, offset, .. } if offset == second
    ));

    // Still decoding; a retry fails the same way and nothing was truncated.
    assert_eq!(wal.state(), WalState::Decoding);
    assert!(matches!(
        wal.read_all(),
        Err(WalError::ChecksumMismatch { .. })
    ));
    wal.close().unwrap();
    assert_eq!(fs::read(&file).unwrap(), bytes);
}

#[test]
fn damaged_length_followed_by_records_is_fatal() {
    let temp = tempdir().unwrap();
    let mut wal = Wal::create(temp.path(), b"meta").unwrap();
    wal.save(HardState::default(), &[entry(1)]).unwrap();
    let file = segment_files(temp.path()).remove(0);
    let second = file_len(&file);
    wal.save(HardState::default(), &[entry(2)]).unwrap();
    wal.save(HardState::default(), &[entry(3)]).unwrap();
    wal.close().unwrap();

    // Make the frame claim to run past the end of the file.
    let mut bytes = fs::read(&file).unwrap();
    bytes[second as usize + 4] = 0x7F;
    fs::write(&file, &bytes).unwrap();

    let err = replay(temp.path()).unwrap_err();
    assert!(matches!(err, WalError::Corrupt { segment: 0, offset, .. } if offset == second));
}

fn rotated_log(path: &Path) {
    let config = Config::default().segment_size_bytes(400).sync_on_save(false);
    let mut wal = Wal::create_with_config(path, b"meta", config).unwrap();
    for i in 1..=30 {
        wal.save(HardState::new(1, 0, i - 1), &[entry(i)]).unwrap();
    }
    wal.close().unwrap();
    assert!(segment_files(path).len() >= 3);
}

#[test]
fn torn_record_in_sealed_segment_is_fatal() {
    let temp = tempdir().unwrap();
    rotated_log(temp.path());

    let first = segment_files(temp.path()).remove(0);
    let len = file_len(&first);
    OpenOptions::new()
        .write(true)
        .open(&first)
        .unwrap()
        .set_len(len - 3)
        .unwrap();

    let err = replay(temp.path()).unwrap_err();
    assert!(matches!(err, WalError::Corrupt { segment: 0, .. }));
}

#[test]
fn torn_tail_in_last_of_many_segments() {
    let temp = tempdir().unwrap();
    rotated_log(temp.path());

    let last = segment_files(temp.path()).pop().unwrap();
    let len = file_len(&last);
    OpenOptions::new()
        .write(true)
        .open(&last)
        .unwrap()
        .set_len(len - 1)
        .unwrap();

    let (state, indexes) = replay(temp.path()).unwrap();
    // The hard state record of the last batch was torn.
    assert_eq!(indexes, (1..=30).collect::<Vec<_>>());
    assert_eq!(state, HardState::new(1, 0, 28));
}

#[test]
fn missing_segment_is_fatal() {
    let temp = tempdir().unwrap();
    rotated_log(temp.path());

    let files = segment_files(temp.path());
    fs::remove_file(&files[1]).unwrap();

    assert!(matches!(
        Wal::open(temp.path(), SnapshotBoundary::default()),
        Err(WalError::Corrupt { segment: 2, .. })
    ));
}

#[test]
fn damaged_segment_header_is_fatal() {
    let temp = tempdir().unwrap();
    Wal::create(temp.path(), b"meta").unwrap().close().unwrap();

    let file = segment_files(temp.path()).remove(0);
    let mut bytes = fs::read(&file).unwrap();
    bytes[8] ^= 0xFF;
    fs::write(&file, &bytes).unwrap();

    assert!(matches!(
        replay(temp.path()),
        Err(WalError::Corrupt { segment: 0, offset: 0, .. })
    ));
}

#[test]
fn interrupted_rotation_leaves_no_trace() {
    let temp = tempdir().unwrap();
    let mut wal = Wal::create(temp.path(), b"meta").unwrap();
    wal.save(HardState::default(), &[entry(1)]).unwrap();
    wal.close().unwrap();

    let leftover = temp
        .path()
        .join(SegmentHeader::new(1, 2).temp_file_name());
    fs::write(&leftover, b"half written segment").unwrap();

    let (_, indexes) = replay(temp.path()).unwrap();
    assert_eq!(indexes, vec![1]);
    assert!(!leftover.exists());
}
