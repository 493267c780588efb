//! Record framing and the chained checksum.
//!
//! Every function here is stateless: the running checksum is passed in and
//! the next value handed back, so the replay and append sides each own
//! their own chain.

use crate::error::{WalError, WalResult};
use crate::types::{Entry, HardState, SnapshotBoundary};
use std::fmt;

/// type (1) + payload length (4)
pub const FRAME_HEADER_SIZE: usize = 5;

/// Trailing checksum size.
pub const FRAME_CRC_SIZE: usize = 4;

/// Largest payload a frame can describe.
pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

/// Type tag of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Carries the running checksum into a new segment.
    Checksum = 1,
    /// Opaque metadata supplied at creation.
    Metadata = 2,
    /// Voting and commitment state.
    HardState = 3,
    /// A log entry.
    Entry = 4,
    /// A snapshot boundary marker.
    Snapshot = 5,
}

impl RecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Checksum),
            2 => Some(Self::Metadata),
            3 => Some(Self::HardState),
            4 => Some(Self::Entry),
            5 => Some(Self::Snapshot),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Short lowercase name, for logs and dumps.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Checksum => "checksum",
            Self::Metadata => "metadata",
            Self::HardState => "hard-state",
            Self::Entry => "entry",
            Self::Snapshot => "snapshot",
        }
    }
}

/// A decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Running checksum at the start of a segment.
    Checksum {
        /// Chain value carried over from the previous segment.
        crc: u32,
    },
    /// Metadata blob.
    Metadata(Vec<u8>),
    /// Hard state.
    HardState(HardState),
    /// Log entry.
    Entry(Entry),
    /// Snapshot boundary.
    Snapshot(SnapshotBoundary),
}

impl WalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Checksum { .. } => RecordType::Checksum,
            Self::Metadata(_) => RecordType::Metadata,
            Self::HardState(_) => RecordType::HardState,
            Self::Entry(_) => RecordType::Entry,
            Self::Snapshot(_) => RecordType::Snapshot,
        }
    }

    /// Serializes the record payload (without frame).
    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Self::Checksum { crc } => crc.to_le_bytes().to_vec(),
            Self::Metadata(data) => data.clone(),
            Self::HardState(state) => {
                let mut buf = Vec::with_capacity(24);
                buf.extend_from_slice(&state.term.to_le_bytes());
                buf.extend_from_slice(&state.vote.to_le_bytes());
                buf.extend_from_slice(&state.commit.to_le_bytes());
                buf
            }
            Self::Entry(entry) => entry_payload(entry),
            Self::Snapshot(snap) => {
                let mut buf = Vec::with_capacity(16);
                buf.extend_from_slice(&snap.index.to_le_bytes());
                buf.extend_from_slice(&snap.term.to_le_bytes());
                buf
            }
        }
    }

    /// Deserializes a record from its type and payload.
    ///
    /// The error is a description of the malformation; the caller knows
    /// where the frame sits and builds the final error.
    pub fn decode_payload(record_type: RecordType, payload: &[u8]) -> Result<Self, String> {
        let read_u64 = |at: usize| -> u64 {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&payload[at..at + 8]);
            u64::from_le_bytes(bytes)
        };
        let expect_len = |len: usize| -> Result<(), String> {
            if payload.len() == len {
                Ok(())
            } else {
                Err(format!(
                    "{} payload must be {len} bytes, got {}",
                    record_type.name(),
                    payload.len()
                ))
            }
        };

        match record_type {
            RecordType::Checksum => {
                expect_len(4)?;
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(payload);
                Ok(Self::Checksum {
                    crc: u32::from_le_bytes(bytes),
                })
            }
            RecordType::Metadata => Ok(Self::Metadata(payload.to_vec())),
            RecordType::HardState => {
                expect_len(24)?;
                Ok(Self::HardState(HardState {
                    term: read_u64(0),
                    vote: read_u64(8),
                    commit: read_u64(16),
                }))
            }
            RecordType::Entry => {
                if payload.len() < 16 {
                    return Err(format!(
                        "entry payload must be at least 16 bytes, got {}",
                        payload.len()
                    ));
                }
                Ok(Self::Entry(Entry {
                    term: read_u64(0),
                    index: read_u64(8),
                    data: payload[16..].to_vec(),
                }))
            }
            RecordType::Snapshot => {
                expect_len(16)?;
                Ok(Self::Snapshot(SnapshotBoundary {
                    index: read_u64(0),
                    term: read_u64(8),
                }))
            }
        }
    }
}

/// Extends the checksum chain over one record.
#[must_use]
pub fn chain_crc(prev: u32, record_type: RecordType, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new_with_initial(prev);
    hasher.update(&[record_type.as_byte()]);
    hasher.update(payload);
    hasher.finalize()
}

/// Appends one framed record to `out` and returns the next chain value.
///
/// Checksum records are self-validating (their frame checksum starts from
/// zero) and leave the chain unchanged.
///
/// # Errors
///
/// Returns `InvalidArgument` if the payload does not fit in a frame.
pub fn encode_frame(record: &WalRecord, crc: u32, out: &mut Vec<u8>) -> WalResult<u32> {
    encode_raw(record.record_type(), &record.encode_payload(), crc, out)
}

/// Frames an entry without building a [`WalRecord`] around it.
pub fn encode_entry(entry: &Entry, crc: u32, out: &mut Vec<u8>) -> WalResult<u32> {
    encode_raw(RecordType::Entry, &entry_payload(entry), crc, out)
}

fn entry_payload(entry: &Entry) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + entry.data.len());
    buf.extend_from_slice(&entry.term.to_le_bytes());
    buf.extend_from_slice(&entry.index.to_le_bytes());
    buf.extend_from_slice(&entry.data);
    buf
}

/// Frames an already serialized payload.
pub fn encode_raw(
    record_type: RecordType,
    payload: &[u8],
    crc: u32,
    out: &mut Vec<u8>,
) -> WalResult<u32> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        WalError::invalid_argument(format!(
            "{} payload of {} bytes exceeds the {MAX_PAYLOAD_SIZE} byte frame limit",
            record_type.name(),
            payload.len()
        ))
    })?;

    let (frame_crc, next) = match record_type {
        RecordType::Checksum => (chain_crc(0, record_type, payload), crc),
        _ => {
            let c = chain_crc(crc, record_type, payload);
            (c, c)
        }
    };

    out.reserve(FRAME_HEADER_SIZE + payload.len() + FRAME_CRC_SIZE);
    out.push(record_type.as_byte());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&frame_crc.to_le_bytes());

    Ok(next)
}

/// Why a frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer ends before the frame does.
    Truncated,
    /// The type byte is not a known record type.
    UnknownType(u8),
    /// The stored checksum does not match the chain.
    ChecksumMismatch {
        /// Checksum stored in the frame.
        stored: u32,
        /// Checksum computed from the chain.
        computed: u32,
        /// Full length of the frame.
        frame_len: usize,
    },
    /// The checksum matched but the payload does not fit its type.
    Malformed(String),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "frame is cut short"),
            Self::UnknownType(b) => write!(f, "unknown record type {b}"),
            Self::ChecksumMismatch {
                stored, computed, ..
            } => write!(
                f,
                "checksum mismatch: stored {stored:08x}, computed {computed:08x}"
            ),
            Self::Malformed(msg) => write!(f, "malformed record: {msg}"),
        }
    }
}

/// A successfully decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// The record.
    pub record: WalRecord,
    /// Bytes consumed, header and checksum included.
    pub frame_len: usize,
    /// Chain value after this record.
    pub crc: u32,
}

/// Decodes the frame at the start of `buf`.
///
/// Returns `Ok(None)` when `buf` is empty (end of data). Trailing bytes after
/// the first frame are ignored.
pub fn decode_frame(buf: &[u8], crc: u32) -> Result<Option<DecodedFrame>, FrameError> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf.len() < FRAME_HEADER_SIZE {
        return Err(FrameError::Truncated);
    }

    let record_type = RecordType::from_byte(buf[0]).ok_or(FrameError::UnknownType(buf[0]))?;
    let payload_len = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    let frame_len = FRAME_HEADER_SIZE + payload_len + FRAME_CRC_SIZE;

    if buf.len() < frame_len {
        return Err(FrameError::Truncated);
    }

    let payload = &buf[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + payload_len];
    let crc_at = FRAME_HEADER_SIZE + payload_len;
    let stored = u32::from_le_bytes([
        buf[crc_at],
        buf[crc_at + 1],
        buf[crc_at + 2],
        buf[crc_at + 3],
    ]);

    let (computed, next) = match record_type {
        RecordType::Checksum => (chain_crc(0, record_type, payload), crc),
        _ => {
            let c = chain_crc(crc, record_type, payload);
            (c, c)
        }
    };

    if stored != computed {
        return Err(FrameError::ChecksumMismatch {
            stored,
            computed,
            frame_len,
        });
    }

    let record = WalRecord::decode_payload(record_type, payload).map_err(FrameError::Malformed)?;

    Ok(Some(DecodedFrame {
        record,
        frame_len,
        crc: next,
    }))
}
