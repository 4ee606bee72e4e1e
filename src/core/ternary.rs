// This module implements the ternary value type used for parser state codes, TCAM
// lookup keys and next-state patterns. Every bit of a Ternary is fixed-0, fixed-1 or
// don't-care. The representation is a (value, mask) pair where a set mask bit means
// the bit is cared about; the hardware word0/word1 view is derived on demand for
// serializers. Literals are written as decimal numbers, `0x` hex with `*` for a
// don't-care nibble, or `0b` binary with `*` for a don't-care bit, and the Display
// implementation prints the same syntax back.

//! Ternary (0 / 1 / don't-care) values.

use std::fmt;
use thiserror::Error;

/// A value where each bit is fixed-0, fixed-1 or don't-care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ternary {
    value: u64,
    mask: u64,
    width: u8,
}

/// Errors produced when parsing a ternary literal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TernaryParseError {
    #[error("empty ternary literal")]
    Empty,

    #[error("invalid digit '{0}' in ternary literal")]
    InvalidDigit(char),

    #[error("ternary literal wider than {max} bits")]
    TooWide { max: u8 },

    #[error("value {value} does not fit in {width} bits")]
    Overflow { value: u64, width: u8 },
}

impl Ternary {
    pub const MAX_WIDTH: u8 = 64;

    /// Mask with the low `width` bits set.
    pub const fn width_mask(width: u8) -> u64 {
        if width >= 64 {
            !0
        } else {
            (1u64 << width) - 1
        }
    }

    /// Fully specified value.
    pub const fn exact(value: u64, width: u8) -> Self {
        let m = Self::width_mask(width);
        Self { value: value & m, mask: m, width }
    }

    /// All bits don't-care.
    pub const fn any(width: u8) -> Self {
        Self { value: 0, mask: 0, width }
    }

    /// Build from a value and a care mask.
    pub const fn new(value: u64, mask: u64, width: u8) -> Self {
        let m = Self::width_mask(width);
        Self {
            value: value & mask & m,
            mask: mask & m,
            width,
        }
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn mask(&self) -> u64 {
        self.mask
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    /// Every bit is cared about.
    pub fn is_exact(&self) -> bool {
        self.mask == Self::width_mask(self.width)
    }

    /// No bit is cared about; matches everything.
    pub fn is_any(&self) -> bool {
        self.mask == 0
    }

    /// Whether a concrete value satisfies this pattern.
    pub fn matches(&self, v: u64) -> bool {
        (v & self.mask) == self.value
    }

    /// Whether some concrete value satisfies both patterns.
    pub fn overlaps(&self, other: &Ternary) -> bool {
        let common = self.mask & other.mask;
        (self.value & common) == (other.value & common)
    }

    /// Truncate, or widen with don't-care high bits.
    pub fn resize(self, width: u8) -> Self {
        Self::new(self.value, self.mask, width)
    }

    /// Concatenate: `self` forms the high bits, `low` the low bits.
    pub fn concat(self, low: Ternary) -> Self {
        let width = self.width.saturating_add(low.width).min(Self::MAX_WIDTH);
        let shift = u32::from(low.width);
        let (value, mask) = if shift >= 64 {
            (low.value, low.mask)
        } else {
            (
                (self.value << shift) | low.value,
                (self.mask << shift) | low.mask,
            )
        };
        Self::new(value, mask, width)
    }

    /// Bits that may be zero (hardware word0 encoding).
    pub fn word0(&self) -> u64 {
        (!self.value | !self.mask) & Self::width_mask(self.width)
    }

    /// Bits that may be one (hardware word1 encoding).
    pub fn word1(&self) -> u64 {
        (self.value | !self.mask) & Self::width_mask(self.width)
    }

    /// Parse a literal. Decimal literals take `default_width`; hex and binary
    /// literals take their width from the number of digits.
    pub fn parse(text: &str, default_width: u8) -> Result<Self, TernaryParseError> {
        let text: String = text.chars().filter(|c| *c != '_').collect();
        if text.is_empty() {
            return Err(TernaryParseError::Empty);
        }

        if let Some(digits) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            return Self::parse_radix(digits, 4);
        }
        if let Some(digits) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
            return Self::parse_radix(digits, 1);
        }

        let mut value: u64 = 0;
        for ch in text.chars() {
            let d = ch.to_digit(10).ok_or(TernaryParseError::InvalidDigit(ch))?;
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(u64::from(d)))
                .ok_or(TernaryParseError::TooWide { max: Self::MAX_WIDTH })?;
        }
        if value & !Self::width_mask(default_width) != 0 {
            return Err(TernaryParseError::Overflow {
                value,
                width: default_width,
            });
        }
        Ok(Self::exact(value, default_width))
    }

    fn parse_radix(digits: &str, bits_per_digit: u32) -> Result<Self, TernaryParseError> {
        if digits.is_empty() {
            return Err(TernaryParseError::Empty);
        }
        let width = digits.chars().count() as u32 * bits_per_digit;
        if width > u32::from(Self::MAX_WIDTH) {
            return Err(TernaryParseError::TooWide { max: Self::MAX_WIDTH });
        }

        let digit_mask = (1u64 << bits_per_digit) - 1;
        let mut value = 0u64;
        let mut mask = 0u64;
        for ch in digits.chars() {
            value <<= bits_per_digit;
            mask <<= bits_per_digit;
            if ch == '*' {
                continue;
            }
            let d = ch
                .to_digit(1 << bits_per_digit)
                .ok_or(TernaryParseError::InvalidDigit(ch))?;
            value |= u64::from(d);
            mask |= digit_mask;
        }
        Ok(Self::new(value, mask, width as u8))
    }

    fn nibble_aligned(&self) -> bool {
        if self.width % 4 != 0 {
            return false;
        }
        (0..self.width / 4).all(|i| {
            let m = (self.mask >> (i * 4)) & 0xf;
            m == 0 || m == 0xf
        })
    }
}

impl fmt::Display for Ternary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.width == 0 {
            return write!(f, "0b");
        }
        if self.nibble_aligned() {
            write!(f, "0x")?;
            for i in (0..self.width / 4).rev() {
                if (self.mask >> (i * 4)) & 0xf == 0 {
                    write!(f, "*")?;
                } else {
                    write!(f, "{:x}", (self.value >> (i * 4)) & 0xf)?;
                }
            }
        } else {
            write!(f, "0b")?;
            for i in (0..self.width).rev() {
                if (self.mask >> i) & 1 == 0 {
                    write!(f, "*")?;
                } else {
                    write!(f, "{}", (self.value >> i) & 1)?;
                }
            }
        }
        Ok(())
    }
}
