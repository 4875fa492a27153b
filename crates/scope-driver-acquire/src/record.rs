//! Frame record layout.
//!
//! A mapped read range is a contiguous run of zero or more records. Each
//! record is a fixed 48-byte little-endian header followed by the pixel
//! payload:
//!
//! | offset | size | field            |
//! |-------:|-----:|------------------|
//! | 0      | 8    | `bytes_of_frame` (header + payload) |
//! | 8      | 8    | `frame_id`       |
//! | 16     | 8    | `timestamp_ns`   |
//! | 24     | 4    | `width`          |
//! | 28     | 4    | `height`         |
//! | 32     | 1    | `sample_type`    |
//! | 33     | 15   | reserved (zero)  |
//!
//! The next record starts `bytes_of_frame` bytes after the current one.

use crate::frame_source::SampleType;
use scope_core::data::Frame;
use thiserror::Error;

/// Size of the fixed record header.
pub const HEADER_LEN: usize = 48;

/// Why a mapped range could not be walked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// Fewer bytes remain than one header.
    #[error("only {available} bytes left, header needs {HEADER_LEN}")]
    TruncatedHeader {
        /// Bytes left in the range
        available: usize,
    },

    /// The declared record size cannot even hold the header.
    #[error("bytes_of_frame {bytes_of_frame} is smaller than the header")]
    TooShort {
        /// Declared record size
        bytes_of_frame: u64,
    },

    /// The declared record size runs past the end of the range.
    #[error("bytes_of_frame {bytes_of_frame} overruns the {available} mapped bytes")]
    Overrun {
        /// Declared record size
        bytes_of_frame: u64,
        /// Bytes left in the range
        available: usize,
    },

    /// The sample type byte is not a known encoding.
    #[error("unknown sample type code {0}")]
    UnknownSampleType(u8),
}

/// Decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Record size, header included
    pub bytes_of_frame: u64,
    /// Engine frame counter, per stream
    pub frame_id: u64,
    /// Capture time since acquisition start
    pub timestamp_ns: u64,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Pixel encoding
    pub sample_type: SampleType,
}

impl FrameHeader {
    /// Header for a payload of `payload_len` bytes.
    pub fn for_payload(
        frame_id: u64,
        timestamp_ns: u64,
        width: u32,
        height: u32,
        sample_type: SampleType,
        payload_len: usize,
    ) -> Self {
        Self {
            bytes_of_frame: (HEADER_LEN + payload_len) as u64,
            frame_id,
            timestamp_ns,
            width,
            height,
            sample_type,
        }
    }

    /// Payload bytes after the header.
    pub fn payload_len(&self) -> usize {
        (self.bytes_of_frame as usize).saturating_sub(HEADER_LEN)
    }

    /// Decode the header at the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, RecordError> {
        let header = bytes.get(..HEADER_LEN).ok_or(RecordError::TruncatedHeader {
            available: bytes.len(),
        })?;

        let u64_at = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&header[at..at + 8]);
            u64::from_le_bytes(raw)
        };
        let u32_at = |at: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&header[at..at + 4]);
            u32::from_le_bytes(raw)
        };

        let bytes_of_frame = u64_at(0);
        if bytes_of_frame < HEADER_LEN as u64 {
            return Err(RecordError::TooShort { bytes_of_frame });
        }
        let sample_type = SampleType::from_wire_code(header[32])
            .ok_or(RecordError::UnknownSampleType(header[32]))?;

        Ok(Self {
            bytes_of_frame,
            frame_id: u64_at(8),
            timestamp_ns: u64_at(16),
            width: u32_at(24),
            height: u32_at(28),
            sample_type,
        })
    }

    /// Encode as the 48 header bytes.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..8].copy_from_slice(&self.bytes_of_frame.to_le_bytes());
        out[8..16].copy_from_slice(&self.frame_id.to_le_bytes());
        out[16..24].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        out[24..28].copy_from_slice(&self.width.to_le_bytes());
        out[28..32].copy_from_slice(&self.height.to_le_bytes());
        out[32] = self.sample_type.wire_code();
        out
    }
}

/// One record borrowed from a mapped range.
#[derive(Debug, Clone, Copy)]
pub struct FrameRecord<'a> {
    /// Decoded header
    pub header: FrameHeader,
    /// Pixel bytes, borrowed from the mapped range
    pub payload: &'a [u8],
}

impl FrameRecord<'_> {
    /// Owned copy of the record as a [`Frame`].
    pub fn to_frame(&self) -> Frame {
        Frame::from_bytes(
            self.header.width,
            self.header.height,
            self.header.sample_type.bytes_per_pixel() * 8,
            self.payload.to_vec(),
        )
        .with_frame_id(self.header.frame_id)
    }
}

/// Append one encoded record (header + payload) to `out`.
pub fn write_record(out: &mut Vec<u8>, header: &FrameHeader, payload: &[u8]) {
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
}

/// Iterator over the records of a mapped range.
///
/// Stops after the first malformed record.
pub struct Records<'a> {
    range: &'a [u8],
    failed: bool,
}

impl<'a> Records<'a> {
    /// Walk every record in `range`.
    pub fn new(range: &'a [u8]) -> Self {
        Self {
            range,
            failed: false,
        }
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<FrameRecord<'a>, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.range.is_empty() || self.failed {
            return None;
        }

        let header = match FrameHeader::parse(self.range) {
            Ok(header) => header,
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        };

        let total = header.bytes_of_frame;
        if total > self.range.len() as u64 {
            self.failed = true;
            return Some(Err(RecordError::Overrun {
                bytes_of_frame: total,
                available: self.range.len(),
            }));
        }

        let (record, rest) = self.range.split_at(total as usize);
        self.range = rest;
        Some(Ok(FrameRecord {
            header,
            payload: &record[HEADER_LEN..],
        }))
    }
}
