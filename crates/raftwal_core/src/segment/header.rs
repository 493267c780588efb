//! Segment header and file naming.

use crate::segment::{SEGMENT_SUFFIX, TEMP_SUFFIX};

/// Magic bytes at the start of every segment file.
pub const SEGMENT_MAGIC: [u8; 4] = *b"RWSG";

/// Current segment format version.
pub const SEGMENT_VERSION: u16 = 1;

/// magic (4) + version (2) + seq (8) + first_index (8) + crc32 (4)
pub const SEGMENT_HEADER_SIZE: usize = 26;

/// Identity of a segment, stored both in its header and in its file name.
///
/// `first_index` is the first entry index the segment may contain. The
/// first segment of a log has `first_index == 0`; every later one starts at
/// the index following the last one known when it was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentHeader {
    /// Position of the segment in the log, contiguous from 0.
    pub seq: u64,
    /// First entry index the segment may contain.
    pub first_index: u64,
}

impl SegmentHeader {
    /// Creates a new header.
    #[must_use]
    pub const fn new(seq: u64, first_index: u64) -> Self {
        Self { seq, first_index }
    }

    /// Header of the segment that follows this one.
    #[must_use]
    pub const fn next(self, first_index: u64) -> Self {
        Self::new(self.seq + 1, first_index)
    }

    /// Serializes the header.
    #[must_use]
    pub fn encode(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut buf = [0u8; SEGMENT_HEADER_SIZE];
        buf[0..4].copy_from_slice(&SEGMENT_MAGIC);
        buf[4..6].copy_from_slice(&SEGMENT_VERSION.to_le_bytes());
        buf[6..14].copy_from_slice(&self.seq.to_le_bytes());
        buf[14..22].copy_from_slice(&self.first_index.to_le_bytes());
        let crc = crc32fast::hash(&buf[..22]);
        buf[22..26].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Parses and validates a header.
    pub fn decode(buf: &[u8]) -> Result<Self, String> {
        if buf.len() < SEGMENT_HEADER_SIZE {
            return Err(format!(
                "segment header needs {SEGMENT_HEADER_SIZE} bytes, got {}",
                buf.len()
            ));
        }
        if buf[0..4] != SEGMENT_MAGIC {
            return Err(format!("invalid segment magic {:?}", &buf[0..4]));
        }

        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version > SEGMENT_VERSION {
            return Err(format!("unsupported segment version {version}"));
        }

        let stored = u32::from_le_bytes([buf[22], buf[23], buf[24], buf[25]]);
        let computed = crc32fast::hash(&buf[..22]);
        if stored != computed {
            return Err(format!(
                "segment header checksum mismatch: stored {stored:08x}, computed {computed:08x}"
            ));
        }

        let mut seq = [0u8; 8];
        seq.copy_from_slice(&buf[6..14]);
        let mut first_index = [0u8; 8];
        first_index.copy_from_slice(&buf[14..22]);

        Ok(Self {
            seq: u64::from_le_bytes(seq),
            first_index: u64::from_le_bytes(first_index),
        })
    }

    /// File name of the segment: `{seq:016x}-{first_index:016x}.wal`.
    ///
    /// Sorting these names sorts segments by `seq`.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{:016x}-{:016x}{SEGMENT_SUFFIX}", self.seq, self.first_index)
    }

    /// File name used while the segment is being written.
    #[must_use]
    pub fn temp_file_name(&self) -> String {
        format!("{}{TEMP_SUFFIX}", self.file_name())
    }

    /// Parses a segment file name. Returns `None` for anything else in the directory.
    #[must_use]
    pub fn parse_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(SEGMENT_SUFFIX)?;
        let (seq, index) = stem.split_once('-')?;
        if seq.len() != 16 || index.len() != 16 {
            return None;
        }
        Some(Self {
            seq: u64::from_str_radix(seq, 16).ok()?,
            first_index: u64::from_str_radix(index, 16).ok()?,
        })
    }
}
