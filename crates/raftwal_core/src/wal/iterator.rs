//! Buffered frame reader over one segment.
//!
//! Reads frames in chunks so replay memory stays bounded by the largest
//! record rather than the segment size. The reader only decodes; deciding
//! whether a failed frame is a torn tail or corruption is up to the caller,
//! which knows whether this is the last segment.

use crate::error::WalResult;
use crate::segment::Segment;
use crate::wal::record::{decode_frame, FrameError, WalRecord, FRAME_CRC_SIZE, FRAME_HEADER_SIZE};

/// Read buffer size.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Result of reading at the current position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A checksum-valid record.
    Record {
        /// Offset of the frame within the segment.
        offset: u64,
        /// The decoded record.
        record: WalRecord,
    },
    /// The segment ends exactly on a frame boundary.
    End,
    /// The bytes at `offset` do not form a valid frame. The reader stops here.
    Failed {
        /// Offset of the bad frame within the segment.
        offset: u64,
        /// What was wrong with it.
        error: FrameError,
    },
}

/// Sequential frame reader for a segment, carrying the checksum chain.
pub struct SegmentReader<'a> {
    segment: &'a Segment,
    total_size: u64,
    /// Offset of `buffer[buffer_pos]` in the segment.
    current_offset: u64,
    buffer: Vec<u8>,
    buffer_pos: usize,
    buffer_len: usize,
    crc: u32,
    finished: bool,
}

impl<'a> SegmentReader<'a> {
    /// Starts reading after the segment header with the given chain value.
    pub fn new(segment: &'a Segment, crc: u32) -> WalResult<Self> {
        Ok(Self {
            total_size: segment.size()?,
            current_offset: segment.data_start(),
            segment,
            buffer: vec![0u8; READ_BUFFER_SIZE],
            buffer_pos: 0,
            buffer_len: 0,
            crc,
            finished: false,
        })
    }

    /// Running checksum after the last record read.
    #[must_use]
    pub fn crc(&self) -> u32 {
        self.crc
    }

    /// Replaces the running checksum. Used to anchor the chain on a
    /// segment's leading checksum record.
    pub fn set_crc(&mut self, crc: u32) {
        self.crc = crc;
    }

    /// End of the last valid frame read so far.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.current_offset
    }

    /// Segment size when the reader was created.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Ensures at least `min_bytes` are buffered from the current position.
    ///
    /// Returns false if the segment ends first. Grows the buffer for records
    /// larger than [`READ_BUFFER_SIZE`].
    fn ensure_buffered(&mut self, min_bytes: usize) -> WalResult<bool> {
        let available = self.buffer_len - self.buffer_pos;
        if available >= min_bytes {
            return Ok(true);
        }

        let remaining = (self.total_size - self.current_offset) as usize;
        if remaining < min_bytes {
            return Ok(false);
        }

        if self.buffer_pos > 0 && available > 0 {
            self.buffer.copy_within(self.buffer_pos..self.buffer_len, 0);
        }
        self.buffer_len = available;
        self.buffer_pos = 0;

        if min_bytes > self.buffer.len() {
            self.buffer.resize(min_bytes.next_power_of_two(), 0);
        }

        let to_read = (self.buffer.len() - self.buffer_len).min(remaining - available);
        if to_read > 0 {
            let read_offset = self.current_offset + self.buffer_len as u64;
            let data = self.segment.read_at(read_offset, to_read)?;
            self.buffer[self.buffer_len..self.buffer_len + data.len()].copy_from_slice(&data);
            self.buffer_len += data.len();
        }

        Ok(self.buffer_len - self.buffer_pos >= min_bytes)
    }

    /// Reads the next frame.
    ///
    /// After `End` or `Failed` every further call returns `End`.
    pub fn read_next(&mut self) -> WalResult<ReadOutcome> {
        if self.finished {
            return Ok(ReadOutcome::End);
        }

        let offset = self.current_offset;
        let remaining = self.total_size - offset;
        if remaining == 0 {
            self.finished = true;
            return Ok(ReadOutcome::End);
        }

        // Never buffer past the end of the segment: a damaged length field
        // must not turn into a huge allocation.
        let header_len = remaining.min(FRAME_HEADER_SIZE as u64) as usize;
        self.ensure_buffered(header_len)?;
        let mut want = header_len;
        if header_len == FRAME_HEADER_SIZE {
            let p = self.buffer_pos;
            let payload_len = u32::from_le_bytes([
                self.buffer[p + 1],
                self.buffer[p + 2],
                self.buffer[p + 3],
                self.buffer[p + 4],
            ]);
            let frame_len =
                FRAME_HEADER_SIZE as u64 + u64::from(payload_len) + FRAME_CRC_SIZE as u64;
            want = frame_len.min(remaining) as usize;
            self.ensure_buffered(want)?;
        }

        let bytes = &self.buffer[self.buffer_pos..self.buffer_pos + want];
        match decode_frame(bytes, self.crc) {
            Ok(Some(frame)) => {
                self.buffer_pos += frame.frame_len;
                self.current_offset += frame.frame_len as u64;
                self.crc = frame.crc;
                Ok(ReadOutcome::Record {
                    offset,
                    record: frame.record,
                })
            }
            Ok(None) => {
                self.finished = true;
                Ok(ReadOutcome::End)
            }
            Err(error) => {
                self.finished = true;
                Ok(ReadOutcome::Failed { offset, error })
            }
        }
    }

    /// Looks for a complete, checksum-valid frame starting anywhere after
    /// `from`.
    ///
    /// Each candidate position is checked with the four bytes in front of it
    /// as chain seed, which is where a real frame's predecessor keeps its
    /// checksum. Finding one means the damage at `from` is followed by
    /// acknowledged data and cannot be a torn write.
    pub fn has_valid_successor(&self, from: u64) -> WalResult<bool> {
        let start = from
            .saturating_sub(FRAME_CRC_SIZE as u64)
            .max(self.segment.data_start());
        if start >= self.total_size {
            return Ok(false);
        }
        let tail = self
            .segment
            .read_at(start, (self.total_size - start) as usize)?;

        let first = (from + 1 - start) as usize;
        for pos in first.max(FRAME_CRC_SIZE)..tail.len() {
            let seed = u32::from_le_bytes([
                tail[pos - 4],
                tail[pos - 3],
                tail[pos - 2],
                tail[pos - 1],
            ]);
            if let Ok(Some(_)) = decode_frame(&tail[pos..], seed) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentHeader;
    use crate::types::{Entry, HardState};
    use crate::wal::record::encode_frame;
    use raftwal_storage::InMemoryBackend;

    fn segment_with(records: &[WalRecord], tail: &[u8]) -> (Segment, Vec<u64>) {
        let header = SegmentHeader::new(0, 0);
        let mut data = header.encode().to_vec();
        let mut offsets = Vec::new();
        let mut crc = 0;
        for record in records {
            offsets.push(data.len() as u64);
            crc = encode_frame(record, crc, &mut data).unwrap();
        }
        data.extend_from_slice(tail);
        let segment = Segment::load(header, Box::new(InMemoryBackend::with_data(data))).unwrap();
        (segment, offsets)
    }

    fn entry(index: u64, len: usize) -> WalRecord {
        WalRecord::Entry(Entry::new(1, index, vec![index as u8; len]))
    }

    fn read_records(reader: &mut SegmentReader<'_>) -> (Vec<WalRecord>, ReadOutcome) {
        let mut records = Vec::new();
        loop {
            match reader.read_next().unwrap() {
                ReadOutcome::Record { record, .. } => records.push(record),
                other => return (records, other),
            }
        }
    }

    #[test]
    fn empty_segment_ends_immediately() {
        let (segment, _) = segment_with(&[], &[]);
        let mut reader = SegmentReader::new(&segment, 0).unwrap();
        assert_eq!(reader.read_next().unwrap(), ReadOutcome::End);
        assert_eq!(reader.offset(), segment.data_start());
    }

    #[test]
    fn reads_records_with_offsets() {
        let records = vec![
            WalRecord::Metadata(b"meta".to_vec()),
            entry(1, 10),
            WalRecord::HardState(HardState::new(1, 2, 1)),
        ];
        let (segment, offsets) = segment_with(&records, &[]);
        let mut reader = SegmentReader::new(&segment, 0).unwrap();

        for (expected, offset) in records.iter().zip(&offsets) {
            assert_eq!(
                reader.read_next().unwrap(),
                ReadOutcome::Record {
                    offset: *offset,
                    record: expected.clone()
                }
            );
        }
        assert_eq!(reader.read_next().unwrap(), ReadOutcome::End);
        assert_eq!(reader.offset(), segment.size().unwrap());
    }

    #[test]
    fn records_larger_than_buffer() {
        let records = vec![entry(1, 3 * READ_BUFFER_SIZE), entry(2, 10)];
        let (segment, _) = segment_with(&records, &[]);
        let mut reader = SegmentReader::new(&segment, 0).unwrap();

        let (read, end) = read_records(&mut reader);
        assert_eq!(read, records);
        assert_eq!(end, ReadOutcome::End);
    }

    #[test]
    fn partial_trailing_frame_fails_at_its_offset() {
        let mut torn = Vec::new();
        encode_frame(&entry(2, 30), 0, &mut torn).unwrap();
        torn.truncate(12);

        let (segment, offsets) = segment_with(&[entry(1, 5)], &torn);
        let mut reader = SegmentReader::new(&segment, 0).unwrap();

        let (read, outcome) = read_records(&mut reader);
        assert_eq!(read.len(), 1);
        let end_of_valid = segment.size().unwrap() - torn.len() as u64;
        assert_eq!(
            outcome,
            ReadOutcome::Failed {
                offset: end_of_valid,
                error: FrameError::Truncated
            }
        );
        assert_eq!(reader.offset(), end_of_valid);
        assert!(offsets[0] < end_of_valid);
        assert!(!reader.has_valid_successor(end_of_valid).unwrap());
        assert_eq!(reader.read_next().unwrap(), ReadOutcome::End);
    }

    #[test]
    fn huge_length_field_is_truncation() {
        let mut bogus = vec![4u8];
        bogus.extend_from_slice(&u32::MAX.to_le_bytes());
        bogus.extend_from_slice(&[0; 8]);

        let (segment, _) = segment_with(&[], &bogus);
        let mut reader = SegmentReader::new(&segment, 0).unwrap();
        assert!(matches!(
            reader.read_next().unwrap(),
            ReadOutcome::Failed {
                error: FrameError::Truncated,
                ..
            }
        ));
    }

    #[test]
    fn zero_filled_tail_has_no_successor() {
        let (segment, _) = segment_with(&[entry(1, 5)], &[0u8; 64]);
        let mut reader = SegmentReader::new(&segment, 0).unwrap();

        let (_, outcome) = read_records(&mut reader);
        let ReadOutcome::Failed { offset, error } = outcome else {
            panic!("expected a failed frame");
        };
        assert_eq!(error, FrameError::UnknownType(0));
        assert!(!reader.has_valid_successor(offset).unwrap());
    }

    #[test]
    fn damaged_frame_followed_by_valid_frame() {
        let records = vec![entry(1, 20), entry(2, 20), entry(3, 20)];
        let header = SegmentHeader::new(0, 0);
        let mut data = header.encode().to_vec();
        let mut crc = 0;
        let mut offsets = Vec::new();
        for record in &records {
            offsets.push(data.len());
            crc = encode_frame(record, crc, &mut data).unwrap();
        }
        // Flip a payload byte of the middle record.
        data[offsets[1] + FRAME_HEADER_SIZE + 17] ^= 0xFF;
        let segment = Segment::load(header, Box::new(InMemoryBackend::with_data(data))).unwrap();

        let mut reader = SegmentReader::new(&segment, 0).unwrap();
        let (read, outcome) = read_records(&mut reader);
        assert_eq!(read.len(), 1);
        assert!(matches!(
            outcome,
            ReadOutcome::Failed {
                error: FrameError::ChecksumMismatch { .. },
                ..
            }
        ));
        // The third frame still validates against the second frame's stored crc.
        assert!(reader.has_valid_successor(offsets[1] as u64).unwrap());
    }

    #[test]
    fn starts_from_given_chain_value() {
        let mut data = SegmentHeader::new(1, 5).encode().to_vec();
        let record = entry(5, 4);
        encode_frame(&record, 0xABCD, &mut data).unwrap();
        let segment = Segment::load(
            SegmentHeader::new(1, 5),
            Box::new(InMemoryBackend::with_data(data)),
        )
        .unwrap();

        let mut reader = SegmentReader::new(&segment, 0).unwrap();
        assert!(matches!(
            reader.read_next().unwrap(),
            ReadOutcome::Failed {
                error: FrameError::ChecksumMismatch { .. },
                ..
            }
        ));

        let mut reader = SegmentReader::new(&segment, 0xABCD).unwrap();
        assert!(matches!(
            reader.read_next().unwrap(),
            ReadOutcome::Record { .. }
        ));
    }
}
