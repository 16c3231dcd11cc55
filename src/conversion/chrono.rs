//! chrono types, mapped onto the driver's date/time values.
//!
//! Infinite dates and timestamps have no chrono counterpart and fail to
//! convert.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};
use crate::types::{Date, FromValue, Time, Timestamp, Value};

use super::{ToWireValue, from_wire_via_value};

/// 2000-01-01 counted from 0001-01-01 as day 1.
const PG_EPOCH_DAYS_FROM_CE: i32 = 730_120;
/// Seconds from the Unix epoch to 2000-01-01.
const PG_EPOCH_UNIX_SECONDS: i64 = 946_684_800;

fn out_of_range(what: &str) -> Error {
    Error::Conversion(format!("{} is out of range for chrono", what))
}

fn date_to_chrono(d: Date) -> Result<NaiveDate> {
    if !d.is_finite() {
        return Err(out_of_range("infinite date"));
    }
    d.0.checked_add(PG_EPOCH_DAYS_FROM_CE)
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .ok_or_else(|| out_of_range("date"))
}

fn date_from_chrono(d: NaiveDate) -> Date {
    Date(d.num_days_from_ce() - PG_EPOCH_DAYS_FROM_CE)
}

fn timestamp_to_chrono(ts: Timestamp) -> Result<DateTime<Utc>> {
    if !ts.is_finite() {
        return Err(out_of_range("infinite timestamp"));
    }
    ts.0
        .checked_add(PG_EPOCH_UNIX_SECONDS * 1_000_000)
        .and_then(DateTime::from_timestamp_micros)
        .ok_or_else(|| out_of_range("timestamp"))
}

fn timestamp_from_chrono(dt: &DateTime<Utc>) -> Result<Timestamp> {
    dt.timestamp_micros()
        .checked_sub(PG_EPOCH_UNIX_SECONDS * 1_000_000)
        .map(Timestamp)
        .ok_or_else(|| Error::overflow("DateTime", "TIMESTAMP"))
}

impl FromValue for NaiveDate {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Date(d) => date_to_chrono(*d),
            Value::Timestamp(ts) | Value::TimestampTz(ts) => Ok(timestamp_to_chrono(*ts)?.date_naive()),
            other => Err(Error::Conversion(format!("cannot convert {:?} to NaiveDate", other))),
        }
    }
}

impl FromValue for NaiveTime {
    fn from_value(value: &Value) -> Result<Self> {
        let Value::Time(Time(micros)) = value else {
            return Err(Error::Conversion(format!("cannot convert {:?} to NaiveTime", value)));
        };
        let secs = u32::try_from(micros.div_euclid(1_000_000)).map_err(|_| out_of_range("time"))?;
        let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
        NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos).ok_or_else(|| out_of_range("time"))
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Timestamp(ts) | Value::TimestampTz(ts) => Ok(timestamp_to_chrono(*ts)?.naive_utc()),
            other => Err(Error::Conversion(format!(
                "cannot convert {:?} to NaiveDateTime",
                other
            ))),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Timestamp(ts) | Value::TimestampTz(ts) => timestamp_to_chrono(*ts),
            other => Err(Error::Conversion(format!("cannot convert {:?} to DateTime", other))),
        }
    }
}

from_wire_via_value!(NaiveDate, NaiveTime, NaiveDateTime, DateTime<Utc>);

/// Conversion into a [`Value`] for parameter encoding.
trait AsValue {
    const OID: Oid;

    fn as_value(&self) -> Result<Value>;
}

impl AsValue for NaiveDate {
    const OID: Oid = oid::DATE;

    fn as_value(&self) -> Result<Value> {
        Ok(Value::Date(date_from_chrono(*self)))
    }
}

impl AsValue for NaiveTime {
    const OID: Oid = oid::TIME;

    fn as_value(&self) -> Result<Value> {
        let micros = i64::from(self.num_seconds_from_midnight()) * 1_000_000
            + i64::from(self.nanosecond() / 1_000);
        Ok(Value::Time(Time(micros)))
    }
}

impl AsValue for NaiveDateTime {
    const OID: Oid = oid::TIMESTAMP;

    fn as_value(&self) -> Result<Value> {
        Ok(Value::Timestamp(timestamp_from_chrono(&self.and_utc())?))
    }
}

impl AsValue for DateTime<Utc> {
    const OID: Oid = oid::TIMESTAMPTZ;

    fn as_value(&self) -> Result<Value> {
        Ok(Value::TimestampTz(timestamp_from_chrono(self)?))
    }
}

macro_rules! to_wire_via_as_value {
    ($($t:ty),+) => {
        $(
            impl ToWireValue for $t {
                fn natural_oid(&self) -> Oid {
                    <$t as AsValue>::OID
                }

                fn format(&self, target_oid: Oid) -> FormatCode {
                    match self.as_value() {
                        Ok(v) => ToWireValue::format(&v, target_oid),
                        Err(_) => FormatCode::Binary,
                    }
                }

                fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<()> {
                    self.as_value()?.encode(target_oid, buf)
                }
            }
        )+
    };
}

to_wire_via_as_value!(NaiveDate, NaiveTime, NaiveDateTime, DateTime<Utc>);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::FromWireValue;

    #[test]
    fn test_date_epoch() {
        let d = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        assert_eq!(date_from_chrono(d), Date(0));
        assert_eq!(NaiveDate::from_binary(oid::DATE, &0_i32.to_be_bytes()).unwrap(), d);
        assert_eq!(
            NaiveDate::from_text(oid::DATE, b"1999-12-31").unwrap(),
            NaiveDate::from_ymd_opt(1999, 12, 31).unwrap()
        );
    }

    #[test]
    fn test_infinity_rejected() {
        assert!(NaiveDate::from_text(oid::DATE, b"infinity").is_err());
        assert!(DateTime::<Utc>::from_binary(oid::TIMESTAMPTZ, &i64::MAX.to_be_bytes()).is_err());
    }

    #[test]
    fn test_time_micros() {
        let t = NaiveTime::from_hms_micro_opt(13, 45, 30, 123_456).unwrap();
        let mut buf = Vec::new();
        t.encode(oid::TIME, &mut buf).unwrap();
        assert_eq!(NaiveTime::from_binary(oid::TIME, &buf[4..]).unwrap(), t);
    }

    #[test]
    fn test_timestamptz_roundtrip() {
        let dt = DateTime::from_timestamp(1_700_000_000, 250_000_000).unwrap();
        let mut buf = Vec::new();
        dt.encode(oid::TIMESTAMPTZ, &mut buf).unwrap();
        let expected = (1_700_000_000 - PG_EPOCH_UNIX_SECONDS) * 1_000_000 + 250_000;
        assert_eq!(&buf[4..], &expected.to_be_bytes());
        assert_eq!(DateTime::<Utc>::from_binary(oid::TIMESTAMPTZ, &buf[4..]).unwrap(), dt);
    }

    #[test]
    fn test_naive_datetime_text() {
        let ndt = NaiveDateTime::from_text(oid::TIMESTAMP, b"2024-03-01 08:30:00.5").unwrap();
        assert_eq!(ndt.to_string(), "2024-03-01 08:30:00.500");
    }
}
