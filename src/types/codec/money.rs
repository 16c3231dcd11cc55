//! MONEY, carried as a count of the currency's smallest unit.
//!
//! The server formats money text with `lc_monetary`, which is never reported
//! to clients. Text input is therefore parsed loosely: currency symbols and
//! group separators are dropped, and a trailing separator followed by
//! [`FRACTION_DIGITS`] digits marks the fraction.

use std::fmt;

use crate::error::{Error, Result};

use super::numeric::Numeric;

/// Fraction digits of the common `lc_monetary` settings.
pub const FRACTION_DIGITS: usize = 2;

const SCALE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Money(pub i64);

impl Money {
    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| Error::Decode(format!("invalid MONEY length: {}", bytes.len())))?;
        Ok(Self(i64::from_be_bytes(raw)))
    }

    pub fn write_binary(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.0.to_be_bytes());
    }

    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || Error::Decode(format!("invalid MONEY: {:?}", s));
        let negative = s.contains(['-', '(']);
        let body: String = s
            .chars()
            .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ','))
            .collect();
        let (int_part, frac_part) = match body.rfind(['.', ',']) {
            Some(pos) if body.len() - pos - 1 == FRACTION_DIGITS => (&body[..pos], &body[pos + 1..]),
            _ => (body.as_str(), ""),
        };
        let mut units: i64 = 0;
        let mut seen = false;
        for c in int_part.chars().chain(frac_part.chars()) {
            if let Some(d) = c.to_digit(10) {
                seen = true;
                units = units
                    .checked_mul(10)
                    .and_then(|u| u.checked_add(i64::from(d)))
                    .ok_or_else(invalid)?;
            }
        }
        if !seen {
            return Err(invalid());
        }
        if frac_part.is_empty() {
            units = units.checked_mul(SCALE).ok_or_else(invalid)?;
        }
        Ok(Self(if negative { -units } else { units }))
    }

    /// The amount as a decimal with [`FRACTION_DIGITS`] places.
    pub fn to_numeric(&self) -> Numeric {
        let digits: Vec<u8> = self
            .0
            .unsigned_abs()
            .to_string()
            .bytes()
            .map(|b| b - b'0')
            .collect();
        match Numeric::from_digits(self.0 < 0, &digits, FRACTION_DIGITS as u16) {
            Ok(n) => n,
            Err(_) => Numeric::from(0),
        }
    }
}

/// Plain `-1234.56`, which money input accepts under any locale using `.`.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = SCALE as u64;
        write!(f, "{}{}.{:02}", sign, abs / scale, abs % scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locale_text() {
        assert_eq!(Money::parse("$1,234.56").unwrap(), Money(123456));
        assert_eq!(Money::parse("-$0.05").unwrap(), Money(-5));
        assert_eq!(Money::parse("($12.00)").unwrap(), Money(-1200));
        assert_eq!(Money::parse("1.234,50 €").unwrap(), Money(123450));
        assert_eq!(Money::parse("7").unwrap(), Money(700));
        assert!(Money::parse("$").is_err());
    }

    #[test]
    fn test_display_and_binary() {
        assert_eq!(Money(-123456).to_string(), "-1234.56");
        assert_eq!(Money(i64::MIN).to_string(), "-92233720368547758.08");
        let mut buf = Vec::new();
        Money(42).write_binary(&mut buf);
        assert_eq!(Money::from_binary(&buf).unwrap(), Money(42));
        assert!(Money::from_binary(&buf[..4]).is_err());
        assert_eq!(Money(-5).to_numeric().to_string(), "-0.05");
    }
}
