//! # Single-Wire Frame Decoding
//!
//! One sensor transmission is 40 bits, most significant bit first:
//!
//! ```text
//! | humidity int | humidity frac | temperature int | temperature frac | checksum |
//! |    8 bits    |    8 bits     |     8 bits      |      8 bits      |  8 bits  |
//! ```
//!
//! The checksum is the low byte of the sum of the first four bytes. Bit 7 of
//! the temperature integer byte flags a negative temperature; the remaining
//! seven bits carry the magnitude. This layout follows the public DHT11
//! datasheet convention and should be checked against the sensor actually
//! wired to the greenhouse.
//!
//! Everything here is pure: the same bits always decode to the same frame.

use crate::Reading;
use std::time::Duration;
use thiserror::Error;

/// Number of bits in one sensor frame.
pub const FRAME_BITS: usize = 40;

/// Reasons a bit sequence cannot become a [`SensorFrame`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The sequence is not exactly [`FRAME_BITS`] long.
    #[error("malformed frame: expected {FRAME_BITS} bits, got {0}")]
    WrongLength(usize),

    /// A position holds something other than 0 or 1.
    #[error("malformed frame: bit {index} has value {value}")]
    InvalidBit { index: usize, value: u8 },

    /// The fifth byte does not match the sum of the first four.
    #[error("checksum mismatch (expected {expected:#04x}, found {actual:#04x})")]
    ChecksumMismatch { expected: u8, actual: u8 },
}

/// Exactly 40 captured bits, in transmission order.
///
/// Construction is the only place framing is checked, so holding a
/// `RawFrame` means the length invariant already holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawFrame([u8; FRAME_BITS]);

impl RawFrame {
    /// Wrap a fully captured bit array. Values other than 0/1 are rejected
    /// later by [`RawFrame::decode`].
    pub fn new(bits: [u8; FRAME_BITS]) -> Self {
        RawFrame(bits)
    }

    /// Frame a bit slice, rejecting any length other than [`FRAME_BITS`].
    pub fn from_bits(bits: &[u8]) -> Result<Self, FrameError> {
        let bits: [u8; FRAME_BITS] = bits
            .try_into()
            .map_err(|_| FrameError::WrongLength(bits.len()))?;
        Ok(RawFrame(bits))
    }

    pub fn bits(&self) -> &[u8; FRAME_BITS] {
        &self.0
    }

    /// Assemble the five bytes and verify the checksum.
    pub fn decode(&self) -> Result<SensorFrame, FrameError> {
        let mut bytes = [0u8; 5];
        for (index, &bit) in self.0.iter().enumerate() {
            if bit > 1 {
                return Err(FrameError::InvalidBit { index, value: bit });
            }
            bytes[index / 8] = (bytes[index / 8] << 1) | bit;
        }

        let frame = SensorFrame {
            humidity_int: bytes[0],
            humidity_frac: bytes[1],
            temperature_int: bytes[2],
            temperature_frac: bytes[3],
            checksum: bytes[4],
        };

        let expected = frame.expected_checksum();
        if expected != frame.checksum {
            return Err(FrameError::ChecksumMismatch {
                expected,
                actual: frame.checksum,
            });
        }

        Ok(frame)
    }
}

/// The five bytes of a checksum-validated frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SensorFrame {
    pub humidity_int: u8,
    /// Informational only; this sensor family sends zero.
    pub humidity_frac: u8,
    /// Bit 7 is the sign flag, bits 0-6 the magnitude.
    pub temperature_int: u8,
    /// Informational only; this sensor family sends zero.
    pub temperature_frac: u8,
    pub checksum: u8,
}

impl SensorFrame {
    /// Build a frame from its four data bytes with a correct checksum.
    pub fn new(
        humidity_int: u8,
        humidity_frac: u8,
        temperature_int: u8,
        temperature_frac: u8,
    ) -> Self {
        let mut frame = SensorFrame {
            humidity_int,
            humidity_frac,
            temperature_int,
            temperature_frac,
            checksum: 0,
        };
        frame.checksum = frame.expected_checksum();
        frame
    }

    /// Encode a reading the way the sensor would transmit it: whole units,
    /// sign in bit 7 of the temperature byte, zero fraction bytes.
    pub fn from_reading(reading: &Reading) -> Self {
        let humidity = reading.humidity_pct.round().clamp(0.0, 100.0) as u8;
        let magnitude = reading.temperature_c.abs().round().min(127.0) as u8;
        let temperature = if reading.temperature_c.round() < 0.0 {
            0x80 | magnitude
        } else {
            magnitude
        };
        SensorFrame::new(humidity, 0, temperature, 0)
    }

    /// Low byte of the sum of the four data bytes.
    pub fn expected_checksum(&self) -> u8 {
        self.humidity_int
            .wrapping_add(self.humidity_frac)
            .wrapping_add(self.temperature_int)
            .wrapping_add(self.temperature_frac)
    }

    /// Signed whole-degree temperature.
    pub fn temperature_celsius(&self) -> i16 {
        let magnitude = i16::from(self.temperature_int & 0x7F);
        if self.temperature_int & 0x80 != 0 {
            -magnitude
        } else {
            magnitude
        }
    }

    pub fn reading(&self) -> Reading {
        Reading {
            temperature_c: f32::from(self.temperature_celsius()),
            humidity_pct: f32::from(self.humidity_int),
        }
    }

    /// The 40 bits of this frame in transmission order.
    pub fn to_bits(&self) -> [u8; FRAME_BITS] {
        let bytes = [
            self.humidity_int,
            self.humidity_frac,
            self.temperature_int,
            self.temperature_frac,
            self.checksum,
        ];
        let mut bits = [0u8; FRAME_BITS];
        for (index, bit) in bits.iter_mut().enumerate() {
            *bit = (bytes[index / 8] >> (7 - index % 8)) & 1;
        }
        bits
    }
}

/// Decode a captured bit sequence into a checksum-validated frame.
///
/// Range policy is not applied here; see the acquisition driver.
pub fn decode_bits(bits: &[u8]) -> Result<SensorFrame, FrameError> {
    RawFrame::from_bits(bits)?.decode()
}

/// Classify one high pulse: longer than `threshold` is a 1, anything else a 0.
pub fn sample_bit(pulse: Duration, threshold: Duration) -> u8 {
    u8::from(pulse > threshold)
}
