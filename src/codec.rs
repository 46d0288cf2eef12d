//! Numeric register encodings.
//!
//! Every [`Encoding`] fixes a buffer length and a byte order; values travel
//! as `f64` on the point side.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// One of the 14 supported register encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Int8,
    Uint8,
    Int16Be,
    Int16Le,
    Uint16Be,
    Uint16Le,
    Int32Be,
    Int32Le,
    Uint32Be,
    Uint32Le,
    FloatBe,
    FloatLe,
    DoubleBe,
    DoubleLe,
}

impl Encoding {
    pub const ALL: [Encoding; 14] = [
        Encoding::Int8,
        Encoding::Uint8,
        Encoding::Int16Be,
        Encoding::Int16Le,
        Encoding::Uint16Be,
        Encoding::Uint16Le,
        Encoding::Int32Be,
        Encoding::Int32Le,
        Encoding::Uint32Be,
        Encoding::Uint32Le,
        Encoding::FloatBe,
        Encoding::FloatLe,
        Encoding::DoubleBe,
        Encoding::DoubleLe,
    ];

    /// Configuration name, e.g. `uint16_be`.
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Int8 => "int8",
            Encoding::Uint8 => "uint8",
            Encoding::Int16Be => "int16_be",
            Encoding::Int16Le => "int16_le",
            Encoding::Uint16Be => "uint16_be",
            Encoding::Uint16Le => "uint16_le",
            Encoding::Int32Be => "int32_be",
            Encoding::Int32Le => "int32_le",
            Encoding::Uint32Be => "uint32_be",
            Encoding::Uint32Le => "uint32_le",
            Encoding::FloatBe => "float_be",
            Encoding::FloatLe => "float_le",
            Encoding::DoubleBe => "double_be",
            Encoding::DoubleLe => "double_le",
        }
    }

    /// Buffer length in bytes.
    pub fn len(self) -> usize {
        match self {
            Encoding::Int8 | Encoding::Uint8 => 1,
            Encoding::Int16Be | Encoding::Int16Le | Encoding::Uint16Be | Encoding::Uint16Le => 2,
            Encoding::Int32Be
            | Encoding::Int32Le
            | Encoding::Uint32Be
            | Encoding::Uint32Le
            | Encoding::FloatBe
            | Encoding::FloatLe => 4,
            Encoding::DoubleBe | Encoding::DoubleLe => 8,
        }
    }

    /// Inclusive range of representable integers, `None` for floating point.
    pub fn integer_range(self) -> Option<(f64, f64)> {
        match self {
            Encoding::Int8 => Some((i8::MIN as f64, i8::MAX as f64)),
            Encoding::Uint8 => Some((0.0, u8::MAX as f64)),
            Encoding::Int16Be | Encoding::Int16Le => Some((i16::MIN as f64, i16::MAX as f64)),
            Encoding::Uint16Be | Encoding::Uint16Le => Some((0.0, u16::MAX as f64)),
            Encoding::Int32Be | Encoding::Int32Le => Some((i32::MIN as f64, i32::MAX as f64)),
            Encoding::Uint32Be | Encoding::Uint32Le => Some((0.0, u32::MAX as f64)),
            _ => None,
        }
    }

    /// Decodes the first [`Encoding::len`] bytes of `buf`.
    pub fn decode(self, buf: &[u8]) -> Result<f64> {
        let n = self.len();
        if buf.len() < n {
            return Err(Error::ShortTransfer {
                expected: n,
                actual: buf.len(),
            });
        }
        let b = &buf[..n];
        let value = match self {
            Encoding::Int8 => b[0] as i8 as f64,
            Encoding::Uint8 => b[0] as f64,
            Encoding::Int16Be => i16::from_be_bytes([b[0], b[1]]) as f64,
            Encoding::Int16Le => i16::from_le_bytes([b[0], b[1]]) as f64,
            Encoding::Uint16Be => u16::from_be_bytes([b[0], b[1]]) as f64,
            Encoding::Uint16Le => u16::from_le_bytes([b[0], b[1]]) as f64,
            Encoding::Int32Be => i32::from_be_bytes(array(b)) as f64,
            Encoding::Int32Le => i32::from_le_bytes(array(b)) as f64,
            Encoding::Uint32Be => u32::from_be_bytes(array(b)) as f64,
            Encoding::Uint32Le => u32::from_le_bytes(array(b)) as f64,
            Encoding::FloatBe => f32::from_be_bytes(array(b)) as f64,
            Encoding::FloatLe => f32::from_le_bytes(array(b)) as f64,
            Encoding::DoubleBe => f64::from_be_bytes(array(b)),
            Encoding::DoubleLe => f64::from_le_bytes(array(b)),
        };
        Ok(value)
    }

    /// Encodes `value` into the first [`Encoding::len`] bytes of `buf`.
    ///
    /// Integer encodings truncate the fractional part and reject values
    /// outside their range; non-finite values are rejected for them too.
    pub fn encode(self, value: f64, buf: &mut [u8]) -> Result<()> {
        let n = self.len();
        if buf.len() < n {
            return Err(Error::ShortTransfer {
                expected: n,
                actual: buf.len(),
            });
        }
        let out_of_range = match self.integer_range() {
            Some((min, max)) => {
                let v = value.trunc();
                !v.is_finite() || v < min || v > max
            }
            None if matches!(self, Encoding::FloatBe | Encoding::FloatLe) => {
                !(value as f32).is_finite()
            }
            None => !value.is_finite(),
        };
        if out_of_range {
            return Err(Error::ValueOutOfRange {
                value,
                encoding: self.name(),
            });
        }
        let out = &mut buf[..n];
        match self {
            Encoding::Int8 => out.copy_from_slice(&(value as i8).to_be_bytes()),
            Encoding::Uint8 => out.copy_from_slice(&(value as u8).to_be_bytes()),
            Encoding::Int16Be => out.copy_from_slice(&(value as i16).to_be_bytes()),
            Encoding::Int16Le => out.copy_from_slice(&(value as i16).to_le_bytes()),
            Encoding::Uint16Be => out.copy_from_slice(&(value as u16).to_be_bytes()),
            Encoding::Uint16Le => out.copy_from_slice(&(value as u16).to_le_bytes()),
            Encoding::Int32Be => out.copy_from_slice(&(value as i32).to_be_bytes()),
            Encoding::Int32Le => out.copy_from_slice(&(value as i32).to_le_bytes()),
            Encoding::Uint32Be => out.copy_from_slice(&(value as u32).to_be_bytes()),
            Encoding::Uint32Le => out.copy_from_slice(&(value as u32).to_le_bytes()),
            Encoding::FloatBe => out.copy_from_slice(&(value as f32).to_be_bytes()),
            Encoding::FloatLe => out.copy_from_slice(&(value as f32).to_le_bytes()),
            Encoding::DoubleBe => out.copy_from_slice(&value.to_be_bytes()),
            Encoding::DoubleLe => out.copy_from_slice(&value.to_le_bytes()),
        }
        Ok(())
    }
}

fn array<const N: usize>(b: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&b[..N]);
    out
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = Error;

    /// Accepts the configuration names case-insensitively; `-` may replace `_`.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Encoding::ALL
            .iter()
            .copied()
            .find(|e| e.name() == normalized)
            .ok_or_else(|| Error::UnsupportedEncoding(s.to_string()))
    }
}
