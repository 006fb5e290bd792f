//! Heart Rate Measurement parsing.
//!
//! Decodes notifications from the Heart Rate Measurement characteristic
//! (`0x2A37`). Only the flags byte and the heart-rate value are read.

use crate::error::{Error, Result};

/// Width of the heart-rate value, selected by bit 0 of the flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValueFormat {
    /// Unsigned 8-bit value.
    Uint8,
    /// Unsigned 16-bit little-endian value.
    Uint16,
}

impl ValueFormat {
    /// Flags bit selecting the 16-bit format.
    pub const FLAG_UINT16: u8 = 0x01;

    /// Derive the format from the flags byte.
    pub fn from_flags(flags: u8) -> Self {
        if flags & Self::FLAG_UINT16 != 0 {
            Self::Uint16
        } else {
            Self::Uint8
        }
    }

    /// Number of bytes the value occupies.
    pub fn width(&self) -> usize {
        match self {
            Self::Uint8 => 1,
            Self::Uint16 => 2,
        }
    }
}

/// A decoded heart-rate measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HeartRateMeasurement {
    /// Heart rate in beats per minute.
    pub value: u16,
    /// Encoding the value was read with.
    pub format: ValueFormat,
}

impl HeartRateMeasurement {
    /// Offset of the heart-rate value in the payload.
    const VALUE_OFFSET: usize = 1;

    /// Parse a measurement from notification data.
    ///
    /// Layout:
    /// - Byte 0: Flags (bit 0: 0 = u8 value, 1 = u16 value)
    /// - Byte 1 (or bytes 1-2, little-endian): Heart rate value
    ///
    /// Trailing fields (energy expended, RR intervals) are ignored.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let flags = *data.first().ok_or_else(|| Error::InvalidData {
            context: "Heart rate measurement is empty".to_string(),
        })?;

        let format = ValueFormat::from_flags(flags);
        let end = Self::VALUE_OFFSET + format.width();

        let bytes = data
            .get(Self::VALUE_OFFSET..end)
            .ok_or_else(|| Error::InvalidData {
                context: format!(
                    "Heart rate measurement too short: {} bytes (need at least {})",
                    data.len(),
                    end
                ),
            })?;

        let value = match format {
            ValueFormat::Uint8 => u16::from(bytes[0]),
            ValueFormat::Uint16 => u16::from_le_bytes([bytes[0], bytes[1]]),
        };

        Ok(Self { value, format })
    }
}

/// Decode the heart-rate value from a measurement payload.
///
/// # Example
///
/// ```
/// use heartlink_ble::decode;
///
/// assert_eq!(decode(&[0x00, 50]).unwrap(), 50);
/// assert_eq!(decode(&[0x01, 0x64, 0x00]).unwrap(), 100);
/// ```
pub fn decode(payload: &[u8]) -> Result<u16> {
    HeartRateMeasurement::parse(payload).map(|m| m.value)
}
