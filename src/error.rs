//! Fault bookkeeping shared by the whole station.
//!
//! Initialization failures are never short-circuited: every subsystem gets
//! its attempt and contributes one bit to an [`ErrorMask`]. The mask is only
//! ever consumed by the status indicator, which maps the highest priority
//! fault to a blink count.

use core::fmt;
use core::ops::{BitOr, BitOrAssign};

/// Bitset over the fault sources of the station.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorMask(u8);

impl ErrorMask {
    /// No fault recorded
    pub const OK: Self = Self(0);
    /// Storage medium could not be mounted or written
    pub const STORAGE: Self = Self(1 << 0);
    /// Spectral sensor unreachable
    pub const SPECTRAL: Self = Self(1 << 1);
    /// Humidity/temperature sensor unreachable
    pub const HUMIDITY_TEMP: Self = Self(1 << 2);
    /// Resistance temperature detector fault
    pub const RTD: Self = Self(1 << 3);
    /// Anemometer fault
    pub const ANEMOMETER: Self = Self(1 << 4);

    /// Blink priority: the first entry present in the mask wins and blinks
    /// `index + 1` times.
    const PRIORITY: [Self; 5] = [
        Self::STORAGE,
        Self::RTD,
        Self::ANEMOMETER,
        Self::HUMIDITY_TEMP,
        Self::SPECTRAL,
    ];

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Number of blinks the status indicator emits for this mask.
    ///
    /// Storage > RTD > anemometer > humidity/temperature > spectral. An empty
    /// mask (or one holding only unknown bits) yields zero.
    pub fn blink_code(self) -> u8 {
        Self::PRIORITY
            .iter()
            .position(|fault| !fault.is_empty() && self.contains(*fault))
            .map_or(0, |index| index as u8 + 1)
    }
}

impl BitOr for ErrorMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ErrorMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ErrorMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#07b}", self.0)
    }
}

/// Failure of the frame store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// The log region has no room left for another record
    OutOfSpace,
    /// The underlying medium reported an error
    Flash,
    /// The record does not fit the write buffer
    RecordTooLarge,
    /// The requested store name is not served by this sink
    UnknownStore,
    /// Appending before the medium was mounted
    NotMounted,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::OutOfSpace => write!(f, "Storage region full"),
            StorageError::Flash => write!(f, "Storage medium error"),
            StorageError::RecordTooLarge => write!(f, "Record too large"),
            StorageError::UnknownStore => write!(f, "Unknown store"),
            StorageError::NotMounted => write!(f, "Storage not mounted"),
        }
    }
}

/// Rejection reason when decoding a stored frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Fewer bytes than timestamp plus checksum
    TooShort,
    /// Trailing checksum does not match the sum of the preceding bytes
    Checksum { expected: u16, actual: u16 },
    /// Frame buffer capacity exceeded while assembling
    Overflow,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::TooShort => write!(f, "Frame too short"),
            FrameError::Checksum { expected, actual } => {
                write!(f, "Checksum mismatch: stored {expected:#06x}, computed {actual:#06x}")
            }
            FrameError::Overflow => write!(f, "Frame buffer overflow"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blink_code_priority() {
        assert_eq!(ErrorMask::OK.blink_code(), 0);
        assert_eq!(ErrorMask::STORAGE.blink_code(), 1);
        assert_eq!(ErrorMask::RTD.blink_code(), 2);
        assert_eq!(ErrorMask::ANEMOMETER.blink_code(), 3);
        assert_eq!(ErrorMask::HUMIDITY_TEMP.blink_code(), 4);
        assert_eq!(ErrorMask::SPECTRAL.blink_code(), 5);

        // Storage outranks everything else
        let all = ErrorMask::from_bits(0b1_1111);
        assert_eq!(all.blink_code(), 1);

        // Spectral only wins when alone
        let mask = ErrorMask::SPECTRAL | ErrorMask::HUMIDITY_TEMP;
        assert_eq!(mask.blink_code(), 4);
    }

    #[test]
    fn test_mask_aggregation() {
        let mut mask = ErrorMask::OK;
        assert!(mask.is_empty());

        mask |= ErrorMask::RTD;
        mask |= ErrorMask::ANEMOMETER;
        assert!(mask.contains(ErrorMask::RTD));
        assert!(mask.contains(ErrorMask::ANEMOMETER));
        assert!(!mask.contains(ErrorMask::STORAGE));
        assert_eq!(mask.bits(), 0b1_1000);
    }

    #[test]
    fn test_unknown_bits_blink_nothing() {
        assert_eq!(ErrorMask::from_bits(0b1000_0000).blink_code(), 0);
    }
}
