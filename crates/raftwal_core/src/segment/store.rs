//! Segment directory management.

use super::header::{SegmentHeader, SEGMENT_HEADER_SIZE};
use crate::dir::WalDir;
use crate::error::{WalError, WalResult};
use raftwal_storage::{FileBackend, StorageBackend};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A segment file found in the log directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Identity parsed from the file name.
    pub header: SegmentHeader,
    /// Full path of the file.
    pub path: PathBuf,
}

/// An open segment: a validated header plus the bytes behind it.
pub struct Segment {
    header: SegmentHeader,
    backend: Box<dyn StorageBackend>,
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl Segment {
    /// Wraps a backend holding a segment and checks its header.
    ///
    /// # Errors
    ///
    /// Returns `Corrupt` if the header is missing, damaged, or does not
    /// describe `expected` (the identity taken from the file name).
    pub fn load(expected: SegmentHeader, backend: Box<dyn StorageBackend>) -> WalResult<Self> {
        let size = backend.size()?;
        if size < SEGMENT_HEADER_SIZE as u64 {
            return Err(WalError::corrupt(
                expected.seq,
                0,
                format!("segment is {size} bytes, shorter than its header"),
            ));
        }

        let bytes = backend.read_at(0, SEGMENT_HEADER_SIZE)?;
        let header =
            SegmentHeader::decode(&bytes).map_err(|msg| WalError::corrupt(expected.seq, 0, msg))?;
        if header != expected {
            return Err(WalError::corrupt(
                expected.seq,
                0,
                format!(
                    "header says seq {} first index {}, file name says seq {} first index {}",
                    header.seq, header.first_index, expected.seq, expected.first_index
                ),
            ));
        }

        Ok(Self { header, backend })
    }

    /// Returns the segment header.
    #[must_use]
    pub fn header(&self) -> SegmentHeader {
        self.header
    }

    /// Returns the segment sequence number.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.header.seq
    }

    /// Offset of the first record.
    #[must_use]
    pub const fn data_start(&self) -> u64 {
        SEGMENT_HEADER_SIZE as u64
    }

    /// Current size in bytes, header included.
    pub fn size(&self) -> WalResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Reads `len` bytes at `offset`.
    pub fn read_at(&self, offset: u64, len: usize) -> WalResult<Vec<u8>> {
        Ok(self.backend.read_at(offset, len)?)
    }

    /// Appends bytes and hands them to the OS. Returns the offset they start at.
    pub fn append(&mut self, data: &[u8]) -> WalResult<u64> {
        let offset = self.backend.append(data)?;
        self.backend.flush()?;
        Ok(offset)
    }

    /// Makes appended bytes durable.
    pub fn sync(&mut self) -> WalResult<()> {
        Ok(self.backend.sync()?)
    }

    /// Cuts the segment back to `size` bytes, durably.
    pub fn truncate(&mut self, size: u64) -> WalResult<()> {
        Ok(self.backend.truncate(size)?)
    }
}

/// The ordered set of segment files in one log directory.
///
/// A store opened with [`create`](Self::create) or [`open`](Self::open)
/// holds the directory lock until [`close`](Self::close) or drop; one opened
/// with [`open_read_only`](Self::open_read_only) never writes.
#[derive(Debug)]
pub struct SegmentStore {
    dir: WalDir,
}

impl SegmentStore {
    /// Locks `path` (creating it if needed) for a new log.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the directory holds segments or any other
    /// file besides the lock and leftover temporary files.
    pub fn create(path: &Path) -> WalResult<Self> {
        let store = Self {
            dir: WalDir::lock(path, true)?,
        };
        if !store.dir.is_fresh()? {
            return Err(WalError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        store.dir.remove_temp_files()?;
        Ok(store)
    }

    /// Locks an existing log directory for replay and appends.
    ///
    /// Leftover temporary files from an interrupted rotation are removed.
    pub fn open(path: &Path) -> WalResult<Self> {
        let dir = WalDir::lock(path, false)?;
        let removed = dir.remove_temp_files()?;
        if removed > 0 {
            debug!(removed, "removed interrupted segment files");
        }
        Ok(Self { dir })
    }

    /// Opens a log directory for inspection without locking it.
    pub fn open_read_only(path: &Path) -> WalResult<Self> {
        Ok(Self {
            dir: WalDir::unlocked(path)?,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Returns true if segments may be created and modified.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.dir.is_locked()
    }

    /// Lists segment files ordered by sequence number.
    ///
    /// # Errors
    ///
    /// Returns `Corrupt` if the sequence numbers are not contiguous or the
    /// first indexes go backwards.
    pub fn list_segments(&self) -> WalResult<Vec<SegmentInfo>> {
        let mut segments = Vec::new();
        for entry in fs::read_dir(self.dir.path())? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(header) = SegmentHeader::parse_file_name(name) {
                segments.push(SegmentInfo {
                    header,
                    path: entry.path(),
                });
            }
        }
        segments.sort_by_key(|s| s.header.seq);

        for pair in segments.windows(2) {
            let (prev, next) = (pair[0].header, pair[1].header);
            if next.seq != prev.seq + 1 {
                return Err(WalError::corrupt(
                    next.seq,
                    0,
                    format!("segment sequence jumps from {} to {}", prev.seq, next.seq),
                ));
            }
            if next.first_index < prev.first_index {
                return Err(WalError::corrupt(
                    next.seq,
                    0,
                    format!(
                        "first index {} is below the previous segment's {}",
                        next.first_index, prev.first_index
                    ),
                ));
            }
        }

        Ok(segments)
    }

    /// Picks the segments needed to replay from a snapshot at `index`: the
    /// last one whose first index is at or below `index`, and all later ones.
    ///
    /// Returns `None` if every segment starts after `index`.
    #[must_use]
    pub fn select(segments: &[SegmentInfo], index: u64) -> Option<&[SegmentInfo]> {
        let start = segments
            .iter()
            .rposition(|s| s.header.first_index <= index)?;
        Some(&segments[start..])
    }

    /// Opens a listed segment and validates its header.
    pub fn open_segment(&self, info: &SegmentInfo) -> WalResult<Segment> {
        let backend: Box<dyn StorageBackend> = if self.is_writable() {
            Box::new(FileBackend::open_existing(&info.path)?)
        } else {
            Box::new(FileBackend::open_read_only(&info.path)?)
        };
        Segment::load(info.header, backend)
    }

    /// Opens segments for a sequential scan, in the given order.
    pub fn open_for_scan(&self, infos: &[SegmentInfo]) -> WalResult<Vec<Segment>> {
        infos.iter().map(|info| self.open_segment(info)).collect()
    }

    /// Writes a new segment holding `header` and `preamble`.
    ///
    /// The file is written under a temporary name, fsynced, renamed into
    /// place and the directory fsynced, so a segment is either absent or
    /// complete.
    pub fn create_segment(&self, header: SegmentHeader, preamble: &[u8]) -> WalResult<Segment> {
        if !self.is_writable() {
            return Err(WalError::invalid_argument(
                "cannot create a segment in a read-only log",
            ));
        }

        let final_path = self.dir.path().join(header.file_name());
        if final_path.exists() {
            return Err(WalError::AlreadyExists { path: final_path });
        }
        let temp_path = self.dir.path().join(header.temp_file_name());
        if temp_path.exists() {
            fs::remove_file(&temp_path)?;
        }

        {
            let mut temp = FileBackend::create_new(&temp_path)?;
            temp.append(&header.encode())?;
            temp.append(preamble)?;
            temp.flush()?;
            temp.sync()?;
        }
        fs::rename(&temp_path, &final_path)?;
        self.dir.sync()?;

        debug!(
            segment = header.seq,
            first_index = header.first_index,
            bytes = SEGMENT_HEADER_SIZE + preamble.len(),
            "created segment"
        );

        Segment::load(header, Box::new(FileBackend::open_existing(&final_path)?))
    }

    /// Seals `active` and replaces it with a new segment.
    ///
    /// `active` is fsynced first; it is only replaced once the new segment
    /// is durable.
    pub fn rotate(
        &self,
        active: &mut Segment,
        next: SegmentHeader,
        preamble: &[u8],
    ) -> WalResult<()> {
        active.sync()?;
        let sealed_size = active.size()?;
        let segment = self.create_segment(next, preamble)?;
        let sealed = std::mem::replace(active, segment);

        info!(
            sealed = sealed.seq(),
            sealed_bytes = sealed_size,
            segment = next.seq,
            first_index = next.first_index,
            "rotated segment"
        );
        Ok(())
    }

    /// Releases the directory lock.
    pub fn close(self) -> WalResult<()> {
        self.dir.unlock()
    }
}
