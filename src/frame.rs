//! Binary frame assembly and decoding.
//!
//! One frame is produced per wake cycle:
//!
//! ```text
//! [timestamp: 8 bytes BE][payload: sensor bytes in registry order][checksum: 2 bytes BE]
//! ```
//!
//! The timestamp slot is 8 bytes wide even though the clock only produces
//! 32-bit values; stored data relies on that width. Payload floats are in
//! the producing machine's byte order. The checksum is the plain 16-bit sum
//! of every preceding byte, wrapping on overflow.

use heapless::Vec;

use crate::error::FrameError;
use crate::sensors::FLOAT_BYTES;
use crate::time::UnixTimestamp;

pub const TIMESTAMP_BYTES: usize = 8;
pub const CHECKSUM_BYTES: usize = 2;

/// Length of a frame carrying `payload` sensor bytes.
pub const fn frame_len(payload: usize) -> usize {
    TIMESTAMP_BYTES + payload + CHECKSUM_BYTES
}

/// Additive checksum, truncated to 16 bits.
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |sum, byte| sum.wrapping_add(u16::from(*byte)))
}

/// Incremental frame writer over a fixed capacity buffer.
pub struct FrameBuilder<const CAP: usize> {
    buf: Vec<u8, CAP>,
}

impl<const CAP: usize> FrameBuilder<CAP> {
    /// Starts a frame with its timestamp slot.
    pub fn new(timestamp: UnixTimestamp) -> Result<Self, FrameError> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&u64::from(timestamp).to_be_bytes())
            .map_err(|_| FrameError::Overflow)?;
        Ok(Self { buf })
    }

    /// Appends raw payload bytes.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        self.buf
            .extend_from_slice(bytes)
            .map_err(|_| FrameError::Overflow)
    }

    /// Reserves `len` zeroed payload bytes and hands them to `fill`, which
    /// returns how many it wrote. Unwritten bytes are released again, all of
    /// them when `fill` fails.
    pub fn fill<F>(&mut self, len: usize, fill: F) -> Result<usize, FrameError>
    where
        F: FnOnce(&mut [u8]) -> Result<usize, FrameError>,
    {
        let start = self.buf.len();
        self.buf
            .resize(start + len, 0)
            .map_err(|_| FrameError::Overflow)?;

        match fill(&mut self.buf[start..]) {
            Ok(written) => {
                let written = written.min(len);
                self.buf.truncate(start + written);
                Ok(written)
            }
            Err(e) => {
                self.buf.truncate(start);
                Err(e)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Seals the frame with the checksum of everything written so far.
    pub fn finish(mut self) -> Result<Frame<CAP>, FrameError> {
        let sum = checksum(&self.buf);
        self.buf
            .extend_from_slice(&sum.to_be_bytes())
            .map_err(|_| FrameError::Overflow)?;

        Ok(Frame { bytes: self.buf })
    }
}

/// A sealed frame. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame<const CAP: usize> {
    bytes: Vec<u8, CAP>,
}

impl<const CAP: usize> Frame<CAP> {
    /// Validates a stored record and copies it into a frame.
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < TIMESTAMP_BYTES + CHECKSUM_BYTES {
            return Err(FrameError::TooShort);
        }

        let (body, trailer) = bytes.split_at(bytes.len() - CHECKSUM_BYTES);
        let expected = u16::from_be_bytes([trailer[0], trailer[1]]);
        let actual = checksum(body);
        if expected != actual {
            return Err(FrameError::Checksum { expected, actual });
        }

        let bytes = Vec::from_slice(bytes).map_err(|_| FrameError::Overflow)?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn timestamp(&self) -> u64 {
        let mut raw = [0u8; TIMESTAMP_BYTES];
        raw.copy_from_slice(&self.bytes[..TIMESTAMP_BYTES]);
        u64::from_be_bytes(raw)
    }

    /// Sensor bytes between the timestamp and the checksum.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[TIMESTAMP_BYTES..self.bytes.len() - CHECKSUM_BYTES]
    }

    pub fn checksum(&self) -> u16 {
        let trailer = &self.bytes[self.bytes.len() - CHECKSUM_BYTES..];
        u16::from_be_bytes([trailer[0], trailer[1]])
    }

    /// Payload decoded as native-endian readings, in registry order.
    pub fn readings(&self) -> impl Iterator<Item = f32> + '_ {
        self.payload().chunks_exact(FLOAT_BYTES).map(|chunk| {
            let mut raw = [0u8; FLOAT_BYTES];
            raw.copy_from_slice(chunk);
            f32::from_ne_bytes(raw)
        })
    }
}
