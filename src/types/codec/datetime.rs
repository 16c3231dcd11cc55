//! DATE, TIME, TIMETZ, TIMESTAMP and TIMESTAMPTZ.
//!
//! Values keep the server's own representation: days or microseconds relative
//! to 2000-01-01, with `infinity` and `-infinity` mapped to the integer
//! extremes exactly as the binary protocol sends them. Text parsing expects
//! `DateStyle = ISO`, which the session requests at startup.

use std::fmt;

use crate::error::{Error, Result};

use super::Reader;

pub(crate) const MICROS_PER_SECOND: i64 = 1_000_000;
pub(crate) const MICROS_PER_DAY: i64 = 86_400 * MICROS_PER_SECOND;

/// Days between 1970-01-01 and 2000-01-01.
const UNIX_TO_PG_DAYS: i64 = 10_957;

/// Days since 1970-01-01 for a proleptic Gregorian date (astronomical year).
pub(crate) fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = (if y >= 0 { y } else { y - 399 }) / 400;
    let yoe = y - era * 400;
    let m = month as i64;
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Inverse of [`days_from_civil`].
pub(crate) fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = (if z >= 0 { z } else { z - 146_096 }) / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

fn days_in_month(year: i64, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ if (year % 4 == 0 && year % 100 != 0) || year % 400 == 0 => 29,
        _ => 28,
    }
}

fn invalid(kind: &str, s: &str) -> Error {
    Error::Decode(format!("invalid {}: {:?}", kind, s))
}

/// Strip a trailing ` BC` era marker.
fn split_era(s: &str) -> (&str, bool) {
    match s.strip_suffix(" BC") {
        Some(rest) => (rest, true),
        None => (s, false),
    }
}

fn parse_num<T: std::str::FromStr>(s: &str, kind: &str, whole: &str) -> Result<T> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(kind, whole));
    }
    s.parse().map_err(|_| invalid(kind, whole))
}

/// Parse `YYYY-MM-DD` (year may exceed four digits) into days since 2000-01-01.
fn parse_ymd(s: &str, bc: bool, whole: &str) -> Result<i64> {
    let mut parts = s.splitn(3, '-');
    let (Some(y), Some(m), Some(d)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid("date", whole));
    };
    let year: i64 = parse_num(y, "date", whole)?;
    let month: u32 = parse_num(m, "date", whole)?;
    let day: u32 = parse_num(d, "date", whole)?;
    if year == 0 || !(1..=12).contains(&month) {
        return Err(invalid("date", whole));
    }
    let year = if bc { 1 - year } else { year };
    if day == 0 || day > days_in_month(year, month) {
        return Err(invalid("date", whole));
    }
    Ok(days_from_civil(year, month, day) - UNIX_TO_PG_DAYS)
}

fn write_ymd(f: &mut fmt::Formatter<'_>, days: i64) -> std::result::Result<bool, fmt::Error> {
    let (year, month, day) = civil_from_days(days + UNIX_TO_PG_DAYS);
    let (year, bc) = if year <= 0 { (1 - year, true) } else { (year, false) };
    write!(f, "{:04}-{:02}-{:02}", year, month, day)?;
    Ok(bc)
}

/// Parse `HH:MM[:SS[.ffffff]]`; returns microseconds and the unparsed tail.
fn parse_clock<'a>(s: &'a str, whole: &str) -> Result<(i64, &'a str)> {
    let end = s
        .find(|c: char| !(c.is_ascii_digit() || c == ':' || c == '.'))
        .unwrap_or(s.len());
    let (clock, tail) = s.split_at(end);
    let (hms, frac) = match clock.split_once('.') {
        Some((hms, frac)) => (hms, Some(frac)),
        None => (clock, None),
    };
    let mut fields = hms.split(':');
    let hours: i64 = parse_num(fields.next().unwrap_or(""), "time", whole)?;
    let minutes: i64 = parse_num(fields.next().unwrap_or(""), "time", whole)?;
    let seconds: i64 = match fields.next() {
        Some(sec) => parse_num(sec, "time", whole)?,
        None => 0,
    };
    if fields.next().is_some() || minutes > 59 || seconds > 60 {
        return Err(invalid("time", whole));
    }
    let micros = match frac {
        Some(frac) => parse_fraction(frac).ok_or_else(|| invalid("time", whole))?,
        None => 0,
    };
    let total = ((hours * 60 + minutes) * 60 + seconds) * MICROS_PER_SECOND + micros;
    Ok((total, tail))
}

/// Fractional seconds digits to microseconds (extra digits are truncated).
pub(crate) fn parse_fraction(frac: &str) -> Option<i64> {
    if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let micros = frac
        .bytes()
        .chain(std::iter::repeat(b'0'))
        .take(6)
        .fold(0i64, |acc, b| acc * 10 + (b - b'0') as i64);
    Some(micros)
}

/// Write `HH:MM:SS[.ffffff]` with trailing fractional zeros trimmed.
pub(crate) fn write_clock(f: &mut fmt::Formatter<'_>, micros: i64) -> fmt::Result {
    let secs = micros / MICROS_PER_SECOND;
    let frac = micros % MICROS_PER_SECOND;
    write!(f, "{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)?;
    if frac != 0 {
        let digits = format!("{:06}", frac);
        write!(f, ".{}", digits.trim_end_matches('0'))?;
    }
    Ok(())
}

/// Parse a UTC offset such as `+05`, `-08:00`, `+05:30:15`, `+0530` or `Z`,
/// returning seconds east of UTC.
fn parse_offset(s: &str, whole: &str) -> Result<i32> {
    if s == "Z" {
        return Ok(0);
    }
    let (sign, body) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => return Err(invalid("time zone offset", whole)),
    };
    let fields: Vec<&str> = if body.contains(':') {
        body.split(':').collect()
    } else if body.len() == 4 {
        vec![&body[..2], &body[2..]]
    } else {
        vec![body]
    };
    if fields.is_empty() || fields.len() > 3 {
        return Err(invalid("time zone offset", whole));
    }
    let mut seconds = 0i32;
    for (i, field) in fields.iter().enumerate() {
        let v: i32 = parse_num(field, "time zone offset", whole)?;
        seconds += v * [3600, 60, 1][i];
    }
    Ok(sign * seconds)
}

fn write_offset(f: &mut fmt::Formatter<'_>, offset: i32) -> fmt::Result {
    let sign = if offset < 0 { '-' } else { '+' };
    let abs = offset.unsigned_abs();
    write!(f, "{}{:02}", sign, abs / 3600)?;
    if abs % 3600 != 0 {
        write!(f, ":{:02}", abs / 60 % 60)?;
        if abs % 60 != 0 {
            write!(f, ":{:02}", abs % 60)?;
        }
    }
    Ok(())
}

/// A calendar date as days since 2000-01-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Date(pub i32);

impl Date {
    pub const INFINITY: Date = Date(i32::MAX);
    pub const NEG_INFINITY: Date = Date(i32::MIN);

    /// Build from an astronomical year (1 BC is year 0), month and day.
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        if !(1..=12).contains(&month) || day == 0 || day > days_in_month(year as i64, month) {
            return None;
        }
        let days = days_from_civil(year as i64, month, day) - UNIX_TO_PG_DAYS;
        i32::try_from(days).ok().map(Date)
    }

    /// Astronomical year, month and day.
    pub fn to_ymd(self) -> (i32, u32, u32) {
        let (y, m, d) = civil_from_days(self.0 as i64 + UNIX_TO_PG_DAYS);
        (y as i32, m, d)
    }

    pub fn is_finite(self) -> bool {
        self != Self::INFINITY && self != Self::NEG_INFINITY
    }

    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes, "DATE");
        let days = r.i32()?;
        r.finish()?;
        Ok(Date(days))
    }

    pub fn write_binary(self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.0.to_be_bytes());
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "infinity" => return Ok(Self::INFINITY),
            "-infinity" => return Ok(Self::NEG_INFINITY),
            _ => {}
        }
        let (body, bc) = split_era(s);
        let days = parse_ymd(body, bc, s)?;
        i32::try_from(days).map(Date).map_err(|_| invalid("date", s))
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::INFINITY => f.write_str("infinity"),
            Self::NEG_INFINITY => f.write_str("-infinity"),
            Date(days) => {
                if write_ymd(f, days as i64)? {
                    f.write_str(" BC")?;
                }
                Ok(())
            }
        }
    }
}

/// Time of day in microseconds since midnight (`24:00:00` is allowed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(pub i64);

impl Time {
    pub fn from_hms_micro(hour: u32, minute: u32, second: u32, micro: u32) -> Option<Self> {
        if hour > 24 || minute > 59 || second > 59 || micro > 999_999 {
            return None;
        }
        let micros = ((hour as i64 * 60 + minute as i64) * 60 + second as i64) * MICROS_PER_SECOND
            + micro as i64;
        (micros <= MICROS_PER_DAY).then_some(Time(micros))
    }

    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes, "TIME");
        let micros = r.i64()?;
        r.finish()?;
        Ok(Time(micros))
    }

    pub fn write_binary(self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.0.to_be_bytes());
    }

    pub fn parse(s: &str) -> Result<Self> {
        let (micros, tail) = parse_clock(s, s)?;
        if !tail.is_empty() || micros > MICROS_PER_DAY {
            return Err(invalid("time", s));
        }
        Ok(Time(micros))
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_clock(f, self.0)
    }
}

/// Time of day with a UTC offset in seconds east of Greenwich.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeTz {
    pub time: Time,
    pub offset: i32,
}

impl TimeTz {
    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes, "TIMETZ");
        let micros = r.i64()?;
        // The wire carries seconds west of UTC.
        let zone = r.i32()?;
        r.finish()?;
        Ok(TimeTz {
            time: Time(micros),
            offset: -zone,
        })
    }

    pub fn write_binary(self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.time.0.to_be_bytes());
        buf.extend_from_slice(&(-self.offset).to_be_bytes());
    }

    pub fn parse(s: &str) -> Result<Self> {
        let (micros, tail) = parse_clock(s, s)?;
        if micros > MICROS_PER_DAY {
            return Err(invalid("timetz", s));
        }
        Ok(TimeTz {
            time: Time(micros),
            offset: parse_offset(tail.trim_start(), s)?,
        })
    }
}

impl fmt::Display for TimeTz {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_clock(f, self.time.0)?;
        write_offset(f, self.offset)
    }
}

/// Microseconds since 2000-01-01 00:00:00.
///
/// Used for both TIMESTAMP (local wall clock) and TIMESTAMPTZ (UTC instant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const INFINITY: Timestamp = Timestamp(i64::MAX);
    pub const NEG_INFINITY: Timestamp = Timestamp(i64::MIN);

    pub fn new(date: Date, time: Time) -> Option<Self> {
        if !date.is_finite() {
            return None;
        }
        (date.0 as i64)
            .checked_mul(MICROS_PER_DAY)
            .and_then(|d| d.checked_add(time.0))
            .map(Timestamp)
    }

    pub fn is_finite(self) -> bool {
        self != Self::INFINITY && self != Self::NEG_INFINITY
    }

    /// Calendar date and time of day.
    pub fn split(self) -> (Date, Time) {
        let days = self.0.div_euclid(MICROS_PER_DAY);
        let micros = self.0.rem_euclid(MICROS_PER_DAY);
        (Date(days as i32), Time(micros))
    }

    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes, "TIMESTAMP");
        let micros = r.i64()?;
        r.finish()?;
        Ok(Timestamp(micros))
    }

    pub fn write_binary(self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.0.to_be_bytes());
    }

    /// Parse `YYYY-MM-DD HH:MM:SS[.f][ BC]`.
    pub fn parse(s: &str) -> Result<Self> {
        Self::parse_inner(s, false)
    }

    /// Parse a TIMESTAMPTZ, normalizing the offset to UTC.
    pub fn parse_tz(s: &str) -> Result<Self> {
        Self::parse_inner(s, true)
    }

    fn parse_inner(s: &str, with_offset: bool) -> Result<Self> {
        match s {
            "infinity" => return Ok(Self::INFINITY),
            "-infinity" => return Ok(Self::NEG_INFINITY),
            _ => {}
        }
        let (body, bc) = split_era(s);
        let (date, clock) = body
            .split_once([' ', 'T'])
            .ok_or_else(|| invalid("timestamp", s))?;
        let days = parse_ymd(date, bc, s)?;
        let (micros, tail) = parse_clock(clock, s)?;
        let tail = tail.trim_start();
        let offset = if tail.is_empty() {
            0
        } else if with_offset {
            parse_offset(tail, s)?
        } else {
            return Err(invalid("timestamp", s));
        };
        days.checked_mul(MICROS_PER_DAY)
            .and_then(|d| d.checked_add(micros))
            .and_then(|t| t.checked_sub(offset as i64 * MICROS_PER_SECOND))
            .map(Timestamp)
            .ok_or_else(|| invalid("timestamp", s))
    }

    /// Display adapter that appends a `+00` offset, as TIMESTAMPTZ input expects.
    pub fn display_utc(self) -> impl fmt::Display {
        TimestampDisplay {
            ts: self,
            utc: true,
        }
    }
}

struct TimestampDisplay {
    ts: Timestamp,
    utc: bool,
}

impl fmt::Display for TimestampDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ts {
            Timestamp::INFINITY => return f.write_str("infinity"),
            Timestamp::NEG_INFINITY => return f.write_str("-infinity"),
            _ => {}
        }
        let (date, time) = self.ts.split();
        let bc = write_ymd(f, date.0 as i64)?;
        f.write_str(" ")?;
        write_clock(f, time.0)?;
        if self.utc {
            f.write_str("+00")?;
        }
        if bc {
            f.write_str(" BC")?;
        }
        Ok(())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        TimestampDisplay {
            ts: *self,
            utc: false,
        }
        .fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch() {
        assert_eq!(Date::parse("2000-01-01").unwrap(), Date(0));
        assert_eq!(Date::parse("1999-12-31").unwrap(), Date(-1));
        assert_eq!(Date::from_ymd(2024, 2, 29).unwrap().to_ymd(), (2024, 2, 29));
        assert!(Date::from_ymd(2023, 2, 29).is_none());
    }

    #[test]
    fn test_date_text() {
        for text in ["2024-01-15", "0044-03-15 BC", "10000-01-01", "infinity", "-infinity"] {
            let date = Date::parse(text).unwrap();
            assert_eq!(date.to_string(), text);
        }
        assert!(Date::parse("2024-13-01").is_err());
        assert!(Date::parse("0000-01-01").is_err());
    }

    #[test]
    fn test_date_binary() {
        let mut buf = Vec::new();
        Date::INFINITY.write_binary(&mut buf);
        assert_eq!(buf, i32::MAX.to_be_bytes());
        assert_eq!(Date::from_binary(&buf).unwrap(), Date::INFINITY);
    }

    #[test]
    fn test_time_text() {
        let t = Time::parse("13:45:10.25").unwrap();
        assert_eq!(t.0, (13 * 3600 + 45 * 60 + 10) * MICROS_PER_SECOND + 250_000);
        assert_eq!(t.to_string(), "13:45:10.25");
        assert_eq!(Time::parse("24:00:00").unwrap().0, MICROS_PER_DAY);
        assert!(Time::parse("24:00:01").is_err());
        assert_eq!(Time::parse("08:30").unwrap().to_string(), "08:30:00");
    }

    #[test]
    fn test_timetz() {
        let t = TimeTz::parse("10:00:00+05:30").unwrap();
        assert_eq!(t.offset, 19_800);
        assert_eq!(t.to_string(), "10:00:00+05:30");
        let mut buf = Vec::new();
        t.write_binary(&mut buf);
        assert_eq!(&buf[8..], &(-19_800i32).to_be_bytes());
        assert_eq!(TimeTz::from_binary(&buf).unwrap(), t);
        assert_eq!(TimeTz::parse("23:59:59-08").unwrap().to_string(), "23:59:59-08");
    }

    #[test]
    fn test_timestamp_text() {
        let ts = Timestamp::parse("2024-01-15 10:30:00.5").unwrap();
        assert_eq!(ts.to_string(), "2024-01-15 10:30:00.5");
        let (date, time) = ts.split();
        assert_eq!(date.to_ymd(), (2024, 1, 15));
        assert_eq!(time.to_string(), "10:30:00.5");

        let before = Timestamp::parse("1999-12-31 23:59:59").unwrap();
        assert_eq!(before.0, -MICROS_PER_SECOND);
        assert_eq!(before.to_string(), "1999-12-31 23:59:59");

        let bc = Timestamp::parse("0044-03-15 12:00:00 BC").unwrap();
        assert_eq!(bc.to_string(), "0044-03-15 12:00:00 BC");
    }

    #[test]
    fn test_timestamptz_normalizes() {
        let ts = Timestamp::parse_tz("2024-01-15 10:30:00+05:30").unwrap();
        assert_eq!(ts, Timestamp::parse("2024-01-15 05:00:00").unwrap());
        assert_eq!(ts.display_utc().to_string(), "2024-01-15 05:00:00+00");
        assert_eq!(Timestamp::parse_tz(&ts.display_utc().to_string()).unwrap(), ts);
        assert!(Timestamp::parse("2024-01-15 10:30:00+05").is_err());
    }

    #[test]
    fn test_timestamp_infinity() {
        assert_eq!(Timestamp::parse_tz("infinity").unwrap(), Timestamp::INFINITY);
        assert_eq!(Timestamp::NEG_INFINITY.display_utc().to_string(), "-infinity");
    }
}
