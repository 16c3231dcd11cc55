//! Arbitrary-precision NUMERIC.
//!
//! Binary layout (see `numeric_send()` in the server's `numeric.c`):
//! - 2 bytes: ndigits (number of base-10000 digits)
//! - 2 bytes: weight (power of 10000 of the first digit)
//! - 2 bytes: sign (0x0000 positive, 0x4000 negative, 0xC000 NaN, 0xD000 +Inf, 0xF000 -Inf)
//! - 2 bytes: dscale (digits after the decimal point)
//! - ndigits * 2 bytes: base-10000 digits
//!
//! Conversion between decimal digits and NBASE groups works on the digit
//! strings directly, so no precision is ever lost to floating point.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

use super::Reader;

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

const NBASE: u16 = 10000;

/// Server limits on digits before and after the decimal point.
const MAX_INTEGER_DIGITS: i64 = 131072;
const MAX_SCALE: i64 = 16383;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Repr {
    NaN,
    PosInfinity,
    NegInfinity,
    /// `(-1)^negative * digits * 10^-scale`. `digits` holds ASCII-free decimal
    /// digits (0..=9), most significant first, without leading zeros.
    Finite {
        negative: bool,
        digits: Vec<u8>,
        scale: u16,
    },
}

/// An exact decimal number as stored by the NUMERIC type.
///
/// Trailing fractional zeros are significant: `1.50` and `1.5` have different
/// scales and compare unequal, matching how the server reports them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Numeric {
    repr: Repr,
}

impl Numeric {
    /// Not-a-number.
    pub fn nan() -> Self {
        Self { repr: Repr::NaN }
    }

    /// Positive or negative infinity.
    pub fn infinity(negative: bool) -> Self {
        Self {
            repr: if negative {
                Repr::NegInfinity
            } else {
                Repr::PosInfinity
            },
        }
    }

    /// Build a finite value from decimal digits (each 0..=9) and a scale.
    pub fn from_digits(negative: bool, digits: &[u8], scale: u16) -> Result<Self> {
        if digits.iter().any(|d| *d > 9) {
            return Err(Error::Encode("numeric digit out of range".into()));
        }
        let start = digits.iter().position(|d| *d != 0).unwrap_or(digits.len());
        let digits = digits[start..].to_vec();
        Ok(Self {
            repr: Repr::Finite {
                negative: negative && !digits.is_empty(),
                digits,
                scale,
            },
        })
    }

    pub fn is_nan(&self) -> bool {
        matches!(self.repr, Repr::NaN)
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self.repr, Repr::PosInfinity | Repr::NegInfinity)
    }

    pub fn is_negative(&self) -> bool {
        matches!(
            self.repr,
            Repr::NegInfinity | Repr::Finite { negative: true, .. }
        )
    }

    /// Digits after the decimal point; 0 for the special values.
    pub fn scale(&self) -> u16 {
        match &self.repr {
            Repr::Finite { scale, .. } => *scale,
            _ => 0,
        }
    }

    /// Unscaled decimal digits, most significant first; `None` for the special values.
    pub fn digits(&self) -> Option<&[u8]> {
        match &self.repr {
            Repr::Finite { digits, .. } => Some(digits),
            _ => None,
        }
    }

    /// The value as `i64` when it is an integer that fits.
    pub fn to_i64(&self) -> Option<i64> {
        let Repr::Finite {
            negative,
            digits,
            scale,
        } = &self.repr
        else {
            return None;
        };
        let scale = *scale as usize;
        let int_len = digits.len().checked_sub(scale)?;
        if digits[int_len..].iter().any(|d| *d != 0) {
            return None;
        }
        // Accumulate as a negative number so i64::MIN fits.
        let mut acc: i64 = 0;
        for d in &digits[..int_len] {
            acc = acc.checked_mul(10)?.checked_sub(*d as i64)?;
        }
        if *negative { Some(acc) } else { acc.checked_neg() }
    }

    /// Nearest `f64`.
    pub fn to_f64(&self) -> f64 {
        match &self.repr {
            Repr::NaN => f64::NAN,
            Repr::PosInfinity => f64::INFINITY,
            Repr::NegInfinity => f64::NEG_INFINITY,
            Repr::Finite { .. } => self.to_string().parse().unwrap_or(f64::NAN),
        }
    }

    /// Decode the binary wire representation.
    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes, "NUMERIC");
        let ndigits = r.i16()?;
        let weight = r.i16()?;
        let sign = r.u16()?;
        let dscale = r.u16()?;

        match sign {
            NUMERIC_NAN => return Ok(Self::nan()),
            NUMERIC_PINF => return Ok(Self::infinity(false)),
            NUMERIC_NINF => return Ok(Self::infinity(true)),
            NUMERIC_POS | NUMERIC_NEG => {}
            other => {
                return Err(Error::Decode(format!("invalid NUMERIC sign: {:#06x}", other)));
            }
        }
        if ndigits < 0 {
            return Err(Error::Decode(format!("invalid NUMERIC ndigits: {}", ndigits)));
        }

        let mut groups = Vec::with_capacity(ndigits as usize);
        for _ in 0..ndigits {
            let group = r.u16()?;
            if group >= NBASE {
                return Err(Error::Decode(format!("invalid NUMERIC digit: {}", group)));
            }
            groups.push(group);
        }
        r.finish()?;

        let weight = weight as i32;
        let group_at = |index: i32| -> u16 {
            if index >= 0 {
                groups.get(index as usize).copied().unwrap_or(0)
            } else {
                0
            }
        };

        let mut digits = Vec::new();
        // Integer part: groups with weight 0..=weight.
        for index in 0..=weight {
            push_group(&mut digits, group_at(index));
        }
        // Fractional part: the first fractional group sits at index weight + 1.
        let mut frac = Vec::with_capacity(dscale as usize + 4);
        let mut index = weight + 1;
        while frac.len() < dscale as usize {
            push_group(&mut frac, group_at(index));
            index += 1;
        }
        frac.truncate(dscale as usize);
        digits.extend_from_slice(&frac);

        Self::from_digits(sign == NUMERIC_NEG, &digits, dscale)
    }

    /// Append the binary wire representation (without length prefix).
    pub fn write_binary(&self, buf: &mut Vec<u8>) {
        let (negative, digits, scale) = match &self.repr {
            Repr::NaN => return write_header(buf, 0, 0, NUMERIC_NAN, 0),
            Repr::PosInfinity => return write_header(buf, 0, 0, NUMERIC_PINF, 0),
            Repr::NegInfinity => return write_header(buf, 0, 0, NUMERIC_NINF, 0),
            Repr::Finite {
                negative,
                digits,
                scale,
            } => (*negative, digits, *scale),
        };

        let scale_len = scale as usize;
        let (int_digits, frac_digits) = if digits.len() > scale_len {
            digits.split_at(digits.len() - scale_len)
        } else {
            (&digits[..0], &digits[..])
        };

        // Left-pad the integer part and right-pad the fraction to whole groups.
        let mut padded = Vec::with_capacity(digits.len() + 8);
        let int_pad = (4 - int_digits.len() % 4) % 4;
        padded.resize(int_pad, 0);
        padded.extend_from_slice(int_digits);
        let int_groups = padded.len() / 4;
        // Fraction digits shorter than the scale are preceded by zeros.
        padded.resize(padded.len() + scale_len - frac_digits.len(), 0);
        padded.extend_from_slice(frac_digits);
        padded.resize(padded.len().div_ceil(4) * 4, 0);

        let mut groups: Vec<u16> = padded
            .chunks(4)
            .map(|c| c.iter().fold(0u16, |acc, d| acc * 10 + *d as u16))
            .collect();
        let mut weight = int_groups as i32 - 1;

        let leading = groups.iter().take_while(|g| **g == 0).count();
        groups.drain(..leading);
        weight -= leading as i32;
        while groups.last() == Some(&0) {
            groups.pop();
        }
        if groups.is_empty() {
            weight = 0;
        }

        let sign = if negative { NUMERIC_NEG } else { NUMERIC_POS };
        write_header(buf, groups.len() as i16, weight as i16, sign, scale);
        for group in groups {
            buf.extend_from_slice(&group.to_be_bytes());
        }
    }
}

fn push_group(out: &mut Vec<u8>, group: u16) {
    out.push((group / 1000) as u8);
    out.push((group / 100 % 10) as u8);
    out.push((group / 10 % 10) as u8);
    out.push((group % 10) as u8);
}

fn write_header(buf: &mut Vec<u8>, ndigits: i16, weight: i16, sign: u16, dscale: u16) {
    buf.extend_from_slice(&ndigits.to_be_bytes());
    buf.extend_from_slice(&weight.to_be_bytes());
    buf.extend_from_slice(&sign.to_be_bytes());
    buf.extend_from_slice(&dscale.to_be_bytes());
}

impl FromStr for Numeric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s {
            "NaN" | "nan" | "NAN" => return Ok(Self::nan()),
            "Infinity" | "+Infinity" | "inf" | "+inf" => return Ok(Self::infinity(false)),
            "-Infinity" | "-inf" => return Ok(Self::infinity(true)),
            _ => {}
        }
        let invalid = || Error::Decode(format!("invalid NUMERIC: {:?}", s));

        let (negative, body) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };
        let (mantissa, exponent) = match body.find(['e', 'E']) {
            Some(pos) => {
                let exp: i32 = body[pos + 1..].parse().map_err(|_| invalid())?;
                (&body[..pos], exp)
            }
            None => (body, 0),
        };
        let (int_part, frac_part) = match mantissa.split_once('.') {
            Some((i, f)) => (i, f),
            None => (mantissa, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        let mut digits = Vec::with_capacity(int_part.len() + frac_part.len());
        for b in int_part.bytes().chain(frac_part.bytes()) {
            if !b.is_ascii_digit() {
                return Err(invalid());
            }
            digits.push(b - b'0');
        }

        let out_of_range = || Error::Decode(format!("NUMERIC out of range: {:?}", s));
        let scale = i64::try_from(frac_part.len())
            .ok()
            .and_then(|len| len.checked_sub(i64::from(exponent)))
            .ok_or_else(out_of_range)?;
        if scale > MAX_SCALE {
            return Err(out_of_range());
        }
        if scale >= 0 {
            return Self::from_digits(negative, &digits, scale as u16);
        }

        let significant = digits.iter().skip_while(|d| **d == 0).count();
        if significant == 0 {
            return Self::from_digits(negative, &[], 0);
        }
        let integer_digits = (significant as i64).saturating_sub(scale);
        if integer_digits > MAX_INTEGER_DIGITS {
            return Err(out_of_range());
        }
        digits.resize(digits.len() + scale.unsigned_abs() as usize, 0);
        Self::from_digits(negative, &digits, 0)
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (negative, digits, scale) = match &self.repr {
            Repr::NaN => return f.write_str("NaN"),
            Repr::PosInfinity => return f.write_str("Infinity"),
            Repr::NegInfinity => return f.write_str("-Infinity"),
            Repr::Finite {
                negative,
                digits,
                scale,
            } => (*negative, digits, *scale as usize),
        };

        let mut out = String::with_capacity(digits.len() + scale + 3);
        if negative {
            out.push('-');
        }
        if digits.len() > scale {
            let (int_part, frac_part) = digits.split_at(digits.len() - scale);
            out.extend(int_part.iter().map(|d| (b'0' + d) as char));
            if scale > 0 {
                out.push('.');
                out.extend(frac_part.iter().map(|d| (b'0' + d) as char));
            }
        } else {
            out.push('0');
            if scale > 0 {
                out.push('.');
                out.extend(std::iter::repeat_n('0', scale - digits.len()));
                out.extend(digits.iter().map(|d| (b'0' + d) as char));
            }
        }
        f.write_str(&out)
    }
}

impl From<i64> for Numeric {
    fn from(value: i64) -> Self {
        let digits: Vec<u8> = value
            .unsigned_abs()
            .to_string()
            .bytes()
            .map(|b| b - b'0')
            .collect();
        Self {
            repr: Repr::Finite {
                negative: value < 0,
                digits: if value == 0 { Vec::new() } else { digits },
                scale: 0,
            },
        }
    }
}
