//! Rust scalars and the driver's own value types.
//!
//! Encoding goes through [`Value`] so that Rust values and dynamic values
//! pick binary or text format by the same rules.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};
use crate::types::{
    Array, BitString, Circle, Composite, Date, FromValue, Inet, Interval, Line, LineSegment,
    MacAddr, Money, Numeric, Path, PgBox, Point, Polygon, Range, Tid, Time, TimeTz, Timestamp,
    Value,
};

use super::{FromWireValue, ToWireValue, decode_builtin, from_wire_via_value};

macro_rules! to_wire_via_value {
    ($($t:ty => |$v:ident| $value:expr),+ $(,)?) => {
        $(
            impl ToWireValue for $t {
                fn natural_oid(&self) -> Oid {
                    let $v = self;
                    Value::natural_oid(&$value)
                }

                fn format(&self, target_oid: Oid) -> FormatCode {
                    let $v = self;
                    ToWireValue::format(&$value, target_oid)
                }

                fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<()> {
                    let $v = self;
                    ToWireValue::encode(&$value, target_oid, buf)
                }
            }
        )+
    };
}

to_wire_via_value!(
    bool => |v| Value::Bool(*v),
    i8 => |v| Value::Int2(i16::from(*v)),
    u8 => |v| Value::Int2(i16::from(*v)),
    i16 => |v| Value::Int2(*v),
    u16 => |v| Value::Int4(i32::from(*v)),
    i32 => |v| Value::Int4(*v),
    u32 => |v| Value::Int8(i64::from(*v)),
    i64 => |v| Value::Int8(*v),
    f32 => |v| Value::Float4(*v),
    f64 => |v| Value::Float8(*v),
    char => |v| Value::Text(v.to_string()),
    Uuid => |v| Value::Uuid(*v),
    Numeric => |v| Value::Numeric(v.clone()),
    Date => |v| Value::Date(*v),
    Time => |v| Value::Time(*v),
    TimeTz => |v| Value::TimeTz(*v),
    Timestamp => |v| Value::Timestamp(*v),
    Interval => |v| Value::Interval(*v),
    Inet => |v| Value::Inet(*v),
    MacAddr => |v| Value::MacAddr(*v),
    Point => |v| Value::Point(*v),
    Line => |v| Value::Line(*v),
    LineSegment => |v| Value::LineSegment(*v),
    PgBox => |v| Value::Box(*v),
    Path => |v| Value::Path(v.clone()),
    Polygon => |v| Value::Polygon(v.clone()),
    Circle => |v| Value::Circle(*v),
    Tid => |v| Value::Tid(*v),
    BitString => |v| Value::Bits(v.clone()),
    Money => |v| Value::Money(*v),
    Array => |v| Value::Array(v.clone()),
    Composite => |v| Value::Composite(v.clone()),
    Range => |v| Value::Range(v.clone()),
);

/// `u64` has no PostgreSQL counterpart; values above `i64::MAX` only fit NUMERIC.
impl ToWireValue for u64 {
    fn natural_oid(&self) -> Oid {
        oid::INT8
    }

    fn format(&self, target_oid: Oid) -> FormatCode {
        match i64::try_from(*self) {
            Ok(v) => v.format(target_oid),
            Err(_) => FormatCode::Text,
        }
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<()> {
        match i64::try_from(*self) {
            Ok(v) => v.encode(target_oid, buf),
            Err(_) if matches!(target_oid, oid::NUMERIC | oid::TEXT | 0) => {
                let text = self.to_string();
                buf.extend_from_slice(&(text.len() as i32).to_be_bytes());
                buf.extend_from_slice(text.as_bytes());
                Ok(())
            }
            Err(_) => Err(Error::overflow("u64", "INT8")),
        }
    }
}

from_wire_via_value!(
    bool,
    i16,
    i32,
    i64,
    u32,
    f32,
    f64,
    Uuid,
    Value,
    Numeric,
    Date,
    Time,
    TimeTz,
    Timestamp,
    Interval,
    Inet,
    MacAddr,
    Point,
    Line,
    LineSegment,
    PgBox,
    Path,
    Polygon,
    Circle,
    Tid,
    BitString,
    Money,
    Array,
    Composite,
    Range,
    HashMap<String, Option<String>>,
);

/// One-dimensional arrays of any convertible element.
impl<T: FromValue> FromWireValue<'_> for Vec<T> {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        decode_builtin(oid, FormatCode::Text, bytes)
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        decode_builtin(oid, FormatCode::Binary, bytes)
    }
}
