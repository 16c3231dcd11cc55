//! INTERVAL.
//!
//! Months and days are calendar quantities that do not convert to a fixed
//! number of microseconds, so the three components are kept apart.

use std::fmt;

use crate::error::{Error, Result};

use super::Reader;
use super::datetime::{MICROS_PER_SECOND, parse_fraction};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Interval {
    pub months: i32,
    pub days: i32,
    pub microseconds: i64,
}

impl Interval {
    pub fn new(months: i32, days: i32, microseconds: i64) -> Self {
        Self {
            months,
            days,
            microseconds,
        }
    }

    /// Binary layout: microseconds (i64), days (i32), months (i32).
    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes, "INTERVAL");
        let microseconds = r.i64()?;
        let days = r.i32()?;
        let months = r.i32()?;
        r.finish()?;
        Ok(Self::new(months, days, microseconds))
    }

    pub fn write_binary(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.microseconds.to_be_bytes());
        buf.extend_from_slice(&self.days.to_be_bytes());
        buf.extend_from_slice(&self.months.to_be_bytes());
    }

    /// Parse the `postgres`, `postgres_verbose` or `iso_8601` output styles.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(iso) = s.strip_prefix('P') {
            return parse_iso(iso, s);
        }
        parse_postgres(s)
    }
}

fn invalid(s: &str) -> Error {
    Error::Decode(format!("invalid INTERVAL: {:?}", s))
}

fn checked_i32(v: i64, s: &str) -> Result<i32> {
    i32::try_from(v).map_err(|_| invalid(s))
}

/// `1 year 2 mons -3 days +04:05:06.5`, or the verbose
/// `@ 1 year 2 mons 3 days 4 hours 5 mins 6.5 secs ago`.
fn parse_postgres(s: &str) -> Result<Interval> {
    let (body, ago) = match s.strip_suffix(" ago") {
        Some(rest) => (rest, true),
        None => (s, false),
    };
    let body = body.strip_prefix('@').unwrap_or(body).trim();

    let mut months: i64 = 0;
    let mut days: i64 = 0;
    let mut micros: i64 = 0;
    let mut tokens = body.split_whitespace();

    while let Some(token) = tokens.next() {
        if token.contains(':') {
            let (negative, clock) = match token.as_bytes().first() {
                Some(b'-') => (true, &token[1..]),
                Some(b'+') => (false, &token[1..]),
                _ => (false, token),
            };
            let value = parse_hms(clock, s)?;
            micros += if negative { -value } else { value };
            continue;
        }

        let unit = tokens.next().ok_or_else(|| invalid(s))?;
        let unit = unit.trim_end_matches('s');
        // Only seconds carry a fraction in the server's output.
        if matches!(unit, "sec" | "second") {
            micros += parse_seconds(token, s)?;
            continue;
        }
        let n: i64 = token.parse().map_err(|_| invalid(s))?;
        match unit {
            "year" => months += n * 12,
            "mon" | "month" => months += n,
            "day" => days += n,
            "hour" => micros += n * 3600 * MICROS_PER_SECOND,
            "min" | "minute" => micros += n * 60 * MICROS_PER_SECOND,
            _ => return Err(invalid(s)),
        }
    }

    if ago {
        months = -months;
        days = -days;
        micros = -micros;
    }
    Ok(Interval::new(checked_i32(months, s)?, checked_i32(days, s)?, micros))
}

/// `HH:MM:SS[.f]`; hours may exceed 24.
fn parse_hms(clock: &str, whole: &str) -> Result<i64> {
    let mut fields = clock.splitn(3, ':');
    let hours: i64 = fields
        .next()
        .and_then(|h| h.parse().ok())
        .ok_or_else(|| invalid(whole))?;
    let minutes: i64 = fields
        .next()
        .and_then(|m| m.parse().ok())
        .ok_or_else(|| invalid(whole))?;
    let seconds = match fields.next() {
        Some(sec) => parse_seconds(sec, whole)?,
        None => 0,
    };
    Ok((hours * 60 + minutes) * 60 * MICROS_PER_SECOND + seconds)
}

/// Signed decimal seconds to microseconds.
fn parse_seconds(token: &str, whole: &str) -> Result<i64> {
    let (negative, body) = match token.as_bytes().first() {
        Some(b'-') => (true, &token[1..]),
        Some(b'+') => (false, &token[1..]),
        _ => (false, token),
    };
    let (int_part, frac) = match body.split_once('.') {
        Some((i, f)) => (i, parse_fraction(f).ok_or_else(|| invalid(whole))?),
        None => (body, 0),
    };
    let secs: i64 = int_part.parse().map_err(|_| invalid(whole))?;
    let value = secs * MICROS_PER_SECOND + frac;
    Ok(if negative { -value } else { value })
}

/// ISO 8601 `P1Y2M3DT4H5M6.5S` (the leading `P` already stripped).
fn parse_iso(body: &str, whole: &str) -> Result<Interval> {
    let mut months: i64 = 0;
    let mut days: i64 = 0;
    let mut micros: i64 = 0;
    let mut in_time = false;
    let mut number = String::new();

    for c in body.chars() {
        match c {
            'T' => in_time = true,
            '0'..='9' | '.' | '-' | '+' => number.push(c),
            unit => {
                let token = std::mem::take(&mut number);
                if in_time && unit == 'S' {
                    micros += parse_seconds(&token, whole)?;
                    continue;
                }
                let n: i64 = token.parse().map_err(|_| invalid(whole))?;
                match (in_time, unit) {
                    (false, 'Y') => months += n * 12,
                    (false, 'M') => months += n,
                    (false, 'W') => days += n * 7,
                    (false, 'D') => days += n,
                    (true, 'H') => micros += n * 3600 * MICROS_PER_SECOND,
                    (true, 'M') => micros += n * 60 * MICROS_PER_SECOND,
                    _ => return Err(invalid(whole)),
                }
            }
        }
    }
    if !number.is_empty() {
        return Err(invalid(whole));
    }
    Ok(Interval::new(
        checked_i32(months, whole)?,
        checked_i32(days, whole)?,
        micros,
    ))
}

/// Formats in the server's default `postgres` style, which it also accepts as
/// input. Once a component is negative, later positive ones carry a `+`.
impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut empty = true;
        let mut seen_negative = false;
        let mut field = |f: &mut fmt::Formatter<'_>, value: i32, unit: &str| -> fmt::Result {
            if value == 0 {
                return Ok(());
            }
            let sign = if seen_negative && value > 0 { "+" } else { "" };
            let plural = if value.abs() == 1 { "" } else { "s" };
            let sep = if empty { "" } else { " " };
            write!(f, "{}{}{} {}{}", sep, sign, value, unit, plural)?;
            empty = false;
            seen_negative |= value < 0;
            Ok(())
        };
        field(f, self.months / 12, "year")?;
        field(f, self.months % 12, "mon")?;
        field(f, self.days, "day")?;

        if self.microseconds == 0 && !empty {
            return Ok(());
        }
        if !empty {
            f.write_str(" ")?;
        }
        if self.microseconds < 0 {
            f.write_str("-")?;
        } else if seen_negative {
            f.write_str("+")?;
        }
        // Hours are unbounded: no wrapping into days.
        let abs = self.microseconds.unsigned_abs();
        let micros_per_hour = 3600 * MICROS_PER_SECOND as u64;
        write!(f, "{:02}:", abs / micros_per_hour)?;
        let rest = abs % micros_per_hour;
        let secs = rest / MICROS_PER_SECOND as u64;
        write!(f, "{:02}:{:02}", secs / 60, secs % 60)?;
        let frac = rest % MICROS_PER_SECOND as u64;
        if frac != 0 {
            let digits = format!("{:06}", frac);
            write!(f, ".{}", digits.trim_end_matches('0'))?;
        }
        Ok(())
    }
}
