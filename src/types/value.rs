//! The dynamically typed result of decoding a column through the registry.

use std::collections::HashMap;
use std::fmt;

use uuid::Uuid;

use crate::conversion::ToWireValue;
use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};

use super::codec::array::{Array, builtin_array_oid};
use super::codec::bits::BitString;
use super::codec::composite::Composite;
use super::codec::datetime::{Date, Time, TimeTz, Timestamp};
use super::codec::geometric::{
    Circle, Line, LineSegment, Path, PgBox, Point, Polygon, format_float,
};
use super::codec::interval::Interval;
use super::codec::money::Money;
use super::codec::network::{Inet, MacAddr};
use super::codec::numeric::Numeric;
use super::codec::range::Range;
use super::codec::scalar::{Tid, format_bytea};
use super::codec::{hstore, write_field, write_nested};

/// A decoded PostgreSQL value. SQL NULL is represented outside this type,
/// as `None` in an `Option<Value>`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Oid(Oid),
    Float4(f32),
    Float8(f64),
    Numeric(Numeric),
    /// TEXT, VARCHAR, BPCHAR, NAME and text passthrough types
    Text(String),
    /// The single-byte `"char"` type
    Char(u8),
    Bytea(Vec<u8>),
    Date(Date),
    Time(Time),
    TimeTz(TimeTz),
    Timestamp(Timestamp),
    /// UTC instant
    TimestampTz(Timestamp),
    Interval(Interval),
    Inet(Inet),
    Cidr(Inet),
    MacAddr(MacAddr),
    Point(Point),
    Line(Line),
    LineSegment(LineSegment),
    Box(PgBox),
    Path(Path),
    Polygon(Polygon),
    Circle(Circle),
    Uuid(Uuid),
    Json(String),
    Jsonb(String),
    Xml(String),
    Hstore(hstore::Hstore),
    Tid(Tid),
    /// BIT or VARBIT
    Bits(BitString),
    Money(Money),
    /// An enum label
    Enum(String),
    Array(Array),
    Composite(Composite),
    Range(Range),
}

impl Value {
    /// The type OID this value encodes to when no target type is known.
    ///
    /// Returns 0 (unspecified) for values whose type OID is only known to the
    /// server, such as enum labels and hstore; the server infers those.
    pub fn natural_oid(&self) -> Oid {
        match self {
            Value::Bool(_) => oid::BOOL,
            Value::Int2(_) => oid::INT2,
            Value::Int4(_) => oid::INT4,
            Value::Int8(_) => oid::INT8,
            Value::Oid(_) => oid::OID,
            Value::Float4(_) => oid::FLOAT4,
            Value::Float8(_) => oid::FLOAT8,
            Value::Numeric(_) => oid::NUMERIC,
            Value::Text(_) => oid::TEXT,
            Value::Char(_) => oid::CHAR,
            Value::Bytea(_) => oid::BYTEA,
            Value::Date(_) => oid::DATE,
            Value::Time(_) => oid::TIME,
            Value::TimeTz(_) => oid::TIMETZ,
            Value::Timestamp(_) => oid::TIMESTAMP,
            Value::TimestampTz(_) => oid::TIMESTAMPTZ,
            Value::Interval(_) => oid::INTERVAL,
            Value::Inet(_) => oid::INET,
            Value::Cidr(_) => oid::CIDR,
            Value::MacAddr(_) => oid::MACADDR,
            Value::Point(_) => oid::POINT,
            Value::Line(_) => oid::LINE,
            Value::LineSegment(_) => oid::LSEG,
            Value::Box(_) => oid::BOX,
            Value::Path(_) => oid::PATH,
            Value::Polygon(_) => oid::POLYGON,
            Value::Circle(_) => oid::CIRCLE,
            Value::Uuid(_) => oid::UUID,
            Value::Json(_) => oid::JSON,
            Value::Jsonb(_) => oid::JSONB,
            Value::Xml(_) => oid::XML,
            Value::Tid(_) => oid::TID,
            Value::Bits(_) => oid::VARBIT,
            Value::Money(_) => oid::MONEY,
            Value::Hstore(_) | Value::Enum(_) => 0,
            Value::Array(a) => builtin_array_oid(a.element_oid).unwrap_or(0),
            Value::Composite(c) => c.type_oid,
            Value::Range(r) => r.type_oid,
        }
    }

    /// Whether this value can be sent in binary as `target`.
    ///
    /// Anything else goes as text, which the server parses with the target
    /// type's input function.
    pub fn binary_compatible(&self, target: Oid) -> bool {
        let natural = self.natural_oid();
        if natural == 0 {
            return false;
        }
        if natural != target {
            return self.coercible_binary(target);
        }
        match self {
            Value::Array(a) => a
                .elements
                .iter()
                .flatten()
                .all(|v| v.binary_compatible(a.element_oid)),
            Value::Composite(c) => c
                .fields
                .iter()
                .all(|(oid, v)| v.as_ref().is_none_or(|v| v.binary_compatible(*oid))),
            Value::Range(r) => [&r.lower, &r.upper]
                .into_iter()
                .filter_map(|b| b.value())
                .all(|v| v.binary_compatible(r.subtype_oid)),
            _ => true,
        }
    }

    fn coercible_binary(&self, target: Oid) -> bool {
        const INTS: [Oid; 3] = [oid::INT2, oid::INT4, oid::INT8];
        const TEXTS: [Oid; 5] = [oid::TEXT, oid::VARCHAR, oid::BPCHAR, oid::NAME, oid::UNKNOWN];
        match self {
            Value::Int2(_) | Value::Int4(_) | Value::Int8(_) => {
                INTS.contains(&target) || target == oid::NUMERIC
            }
            Value::Float4(_) | Value::Float8(_) => matches!(target, oid::FLOAT4 | oid::FLOAT8),
            Value::Text(_) | Value::Json(_) | Value::Xml(_) => TEXTS.contains(&target),
            Value::Timestamp(_) | Value::TimestampTz(_) => {
                matches!(target, oid::TIMESTAMP | oid::TIMESTAMPTZ)
            }
            Value::Inet(_) | Value::Cidr(_) => matches!(target, oid::INET | oid::CIDR),
            Value::Oid(_) => matches!(target, oid::REGPROC | oid::REGCLASS | oid::REGTYPE),
            Value::Bits(_) => target == oid::BIT,
            Value::Array(a) => {
                a.is_vector_shaped()
                    && matches!(
                        (a.element_oid, target),
                        (oid::INT2, oid::INT2VECTOR) | (oid::OID, oid::OIDVECTOR)
                    )
            }
            _ => false,
        }
    }

    /// Append the binary representation for `target` (no length prefix).
    ///
    /// `target` must satisfy [`binary_compatible`](Self::binary_compatible),
    /// or be 0 to use the natural type.
    pub fn write_binary(&self, target: Oid, buf: &mut Vec<u8>) -> Result<()> {
        let target = if target == 0 { self.natural_oid() } else { target };
        match self {
            Value::Int2(v) => write_int(*v as i64, "INT2", target, buf)?,
            Value::Int4(v) => write_int(*v as i64, "INT4", target, buf)?,
            Value::Int8(v) => write_int(*v, "INT8", target, buf)?,
            Value::Float4(v) if target == oid::FLOAT8 => {
                buf.extend_from_slice(&(*v as f64).to_be_bytes())
            }
            Value::Float8(v) if target == oid::FLOAT4 => {
                buf.extend_from_slice(&(*v as f32).to_be_bytes())
            }
            Value::Bool(v) => buf.push(*v as u8),
            Value::Oid(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Value::Float4(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Value::Float8(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Value::Numeric(n) => n.write_binary(buf),
            Value::Text(s) | Value::Json(s) | Value::Xml(s) | Value::Enum(s) => {
                buf.extend_from_slice(s.as_bytes())
            }
            Value::Jsonb(s) => {
                buf.push(1);
                buf.extend_from_slice(s.as_bytes());
            }
            Value::Char(c) => buf.push(*c),
            Value::Bytea(b) => buf.extend_from_slice(b),
            Value::Date(d) => d.write_binary(buf),
            Value::Time(t) => t.write_binary(buf),
            Value::TimeTz(t) => t.write_binary(buf),
            Value::Timestamp(ts) | Value::TimestampTz(ts) => ts.write_binary(buf),
            Value::Interval(iv) => iv.write_binary(buf),
            Value::Inet(inet) | Value::Cidr(inet) => inet.write_binary(buf, target == oid::CIDR),
            Value::MacAddr(mac) => buf.extend_from_slice(&mac.0),
            Value::Point(p) => p.write_binary(buf),
            Value::Line(l) => l.write_binary(buf),
            Value::LineSegment(l) => l.write_binary(buf),
            Value::Box(b) => b.write_binary(buf),
            Value::Path(p) => p.write_binary(buf),
            Value::Polygon(p) => p.write_binary(buf),
            Value::Circle(c) => c.write_binary(buf),
            Value::Uuid(u) => buf.extend_from_slice(u.as_bytes()),
            Value::Hstore(pairs) => hstore::write_binary(pairs, buf),
            Value::Tid(tid) => tid.write_binary(buf),
            Value::Bits(bits) => bits.write_binary(buf)?,
            Value::Money(m) => m.write_binary(buf),
            Value::Array(a) if matches!(target, oid::INT2VECTOR | oid::OIDVECTOR) => {
                a.write_vector_binary(buf)?
            }
            Value::Array(a) => a.write_binary(buf)?,
            Value::Composite(c) => c.write_binary(buf)?,
            Value::Range(r) => r.write_binary(buf)?,
        }
        Ok(())
    }

    /// Borrow the string payload of textual variants.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Json(s) | Value::Jsonb(s) | Value::Xml(s) | Value::Enum(s) => {
                Some(s)
            }
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_composite(&self) -> Option<&Composite> {
        match self {
            Value::Composite(c) => Some(c),
            _ => None,
        }
    }

    /// Text input form for `target`. Vectors are space separated, not
    /// written as array literals.
    pub fn text_for(&self, target: Oid) -> String {
        match self {
            Value::Array(a) if matches!(target, oid::INT2VECTOR | oid::OIDVECTOR) => a.vector_text(),
            other => other.to_string(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "BOOL",
            Value::Int2(_) => "INT2",
            Value::Int4(_) => "INT4",
            Value::Int8(_) => "INT8",
            Value::Oid(_) => "OID",
            Value::Float4(_) => "FLOAT4",
            Value::Float8(_) => "FLOAT8",
            Value::Numeric(_) => "NUMERIC",
            Value::Text(_) => "TEXT",
            Value::Char(_) => "CHAR",
            Value::Bytea(_) => "BYTEA",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::TimeTz(_) => "TIMETZ",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::TimestampTz(_) => "TIMESTAMPTZ",
            Value::Interval(_) => "INTERVAL",
            Value::Inet(_) => "INET",
            Value::Cidr(_) => "CIDR",
            Value::MacAddr(_) => "MACADDR",
            Value::Point(_) => "POINT",
            Value::Line(_) => "LINE",
            Value::LineSegment(_) => "LSEG",
            Value::Box(_) => "BOX",
            Value::Path(_) => "PATH",
            Value::Polygon(_) => "POLYGON",
            Value::Circle(_) => "CIRCLE",
            Value::Uuid(_) => "UUID",
            Value::Json(_) => "JSON",
            Value::Jsonb(_) => "JSONB",
            Value::Xml(_) => "XML",
            Value::Hstore(_) => "HSTORE",
            Value::Tid(_) => "TID",
            Value::Bits(_) => "VARBIT",
            Value::Money(_) => "MONEY",
            Value::Enum(_) => "ENUM",
            Value::Array(_) => "ARRAY",
            Value::Composite(_) => "RECORD",
            Value::Range(_) => "RANGE",
        }
    }
}

fn write_int(v: i64, from: &str, target: Oid, buf: &mut Vec<u8>) -> Result<()> {
    match target {
        oid::INT2 => {
            let v = i16::try_from(v).map_err(|_| Error::overflow(from, "INT2"))?;
            buf.extend_from_slice(&v.to_be_bytes());
        }
        oid::INT4 => {
            let v = i32::try_from(v).map_err(|_| Error::overflow(from, "INT4"))?;
            buf.extend_from_slice(&v.to_be_bytes());
        }
        oid::INT8 => buf.extend_from_slice(&v.to_be_bytes()),
        oid::NUMERIC => Numeric::from(v).write_binary(buf),
        other => return Err(Error::type_mismatch(oid::INT8, other)),
    }
    Ok(())
}

/// The text input representation, as the server would print it.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => f.write_str(if *v { "t" } else { "f" }),
            Value::Int2(v) => write!(f, "{}", v),
            Value::Int4(v) => write!(f, "{}", v),
            Value::Int8(v) => write!(f, "{}", v),
            Value::Oid(v) => write!(f, "{}", v),
            Value::Float4(v) => f.write_str(&format_float(*v as f64)),
            Value::Float8(v) => f.write_str(&format_float(*v)),
            Value::Numeric(n) => write!(f, "{}", n),
            Value::Text(s) | Value::Json(s) | Value::Jsonb(s) | Value::Xml(s) | Value::Enum(s) => {
                f.write_str(s)
            }
            Value::Char(c) => write!(f, "{}", *c as char),
            Value::Bytea(b) => f.write_str(&format_bytea(b)),
            Value::Date(d) => write!(f, "{}", d),
            Value::Time(t) => write!(f, "{}", t),
            Value::TimeTz(t) => write!(f, "{}", t),
            Value::Timestamp(ts) => write!(f, "{}", ts),
            Value::TimestampTz(ts) => write!(f, "{}", ts.display_utc()),
            Value::Interval(iv) => write!(f, "{}", iv),
            Value::Inet(inet) => write!(f, "{}", inet),
            Value::Cidr(inet) => write!(f, "{}", inet.display_cidr()),
            Value::MacAddr(mac) => write!(f, "{}", mac),
            Value::Point(p) => write!(f, "{}", p),
            Value::Line(l) => write!(f, "{}", l),
            Value::LineSegment(l) => write!(f, "{}", l),
            Value::Box(b) => write!(f, "{}", b),
            Value::Path(p) => write!(f, "{}", p),
            Value::Polygon(p) => write!(f, "{}", p),
            Value::Circle(c) => write!(f, "{}", c),
            Value::Uuid(u) => write!(f, "{}", u),
            Value::Hstore(pairs) => f.write_str(&hstore::format(pairs)),
            Value::Tid(tid) => write!(f, "{}", tid),
            Value::Bits(bits) => write!(f, "{}", bits),
            Value::Money(m) => write!(f, "{}", m),
            Value::Array(a) => write!(f, "{}", a),
            Value::Composite(c) => write!(f, "{}", c),
            Value::Range(r) => write!(f, "{}", r),
        }
    }
}

impl ToWireValue for Value {
    fn natural_oid(&self) -> Oid {
        Value::natural_oid(self)
    }

    /// Binary when the value's binary form matches the target, else text.
    /// Target 0 means the server left the type open; use the natural type.
    fn format(&self, target_oid: Oid) -> FormatCode {
        let target = if target_oid == 0 { self.natural_oid() } else { target_oid };
        if target != 0 && self.binary_compatible(target) {
            FormatCode::Binary
        } else {
            FormatCode::Text
        }
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<()> {
        let target = if target_oid == 0 { self.natural_oid() } else { target_oid };
        match ToWireValue::format(self, target_oid) {
            FormatCode::Binary => write_nested(buf, |b| self.write_binary(target, b)),
            FormatCode::Text => {
                write_field(buf, Some(self.text_for(target).as_bytes()));
                Ok(())
            }
        }
    }
}

/// Conversion from a decoded column value into a Rust type.
///
/// Numeric conversions are range-checked: an INT8 that does not fit `i32`,
/// or a NUMERIC with a fractional part requested as `i64`, is a
/// [`Error::Conversion`].
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;

    fn from_null() -> Result<Self> {
        Err(Error::Conversion("unexpected NULL value".into()))
    }

    /// Convert an optional column value.
    fn from_column(value: Option<&Value>) -> Result<Self> {
        match value {
            Some(v) => Self::from_value(v),
            None => Self::from_null(),
        }
    }
}

fn mismatch(value: &Value, to: &str) -> Error {
    Error::Conversion(format!("cannot convert {} to {}", value.type_name(), to))
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        T::from_value(value).map(Some)
    }

    fn from_null() -> Result<Self> {
        Ok(None)
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(v) => Ok(*v),
            other => Err(mismatch(other, "bool")),
        }
    }
}

macro_rules! impl_from_value_int {
    ($($t:ty => $name:literal),+) => {
        $(
            impl FromValue for $t {
                fn from_value(value: &Value) -> Result<Self> {
                    let wide: i64 = match value {
                        Value::Int2(v) => *v as i64,
                        Value::Int4(v) => *v as i64,
                        Value::Int8(v) => *v,
                        Value::Oid(v) => *v as i64,
                        Value::Numeric(n) => n
                            .to_i64()
                            .ok_or_else(|| Error::overflow("NUMERIC", $name))?,
                        other => return Err(mismatch(other, $name)),
                    };
                    <$t>::try_from(wide).map_err(|_| Error::overflow(value.type_name(), $name))
                }
            }
        )+
    };
}

impl_from_value_int!(i16 => "i16", i32 => "i32", i64 => "i64", u32 => "u32");

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float4(v) => Ok(*v as f64),
            Value::Float8(v) => Ok(*v),
            Value::Int2(v) => Ok(*v as f64),
            Value::Int4(v) => Ok(*v as f64),
            Value::Numeric(n) => Ok(n.to_f64()),
            other => Err(mismatch(other, "f64")),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float4(v) => Ok(*v),
            Value::Int2(v) => Ok(*v as f32),
            other => Err(mismatch(other, "f32")),
        }
    }
}

/// Every value has a text form; binary payloads are rejected.
impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bytea(_) => Err(mismatch(value, "String")),
            other => Ok(other.as_str().map(str::to_owned).unwrap_or_else(|| other.to_string())),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bytea(b) => Ok(b.clone()),
            Value::Text(s) => Ok(s.as_bytes().to_vec()),
            other => Err(mismatch(other, "Vec<u8>")),
        }
    }
}

impl FromValue for Timestamp {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Timestamp(ts) | Value::TimestampTz(ts) => Ok(*ts),
            other => Err(mismatch(other, "Timestamp")),
        }
    }
}

impl FromValue for Inet {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Inet(inet) | Value::Cidr(inet) => Ok(*inet),
            other => Err(mismatch(other, "Inet")),
        }
    }
}

impl FromValue for HashMap<String, Option<String>> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Hstore(pairs) => Ok(pairs.iter().cloned().collect()),
            other => Err(mismatch(other, "HashMap")),
        }
    }
}

/// One-dimensional arrays (or empty ones) only.
impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self> {
        let Value::Array(array) = value else {
            return Err(mismatch(value, "Vec"));
        };
        if array.dims.len() > 1 {
            return Err(Error::Conversion(format!(
                "cannot convert {}-dimensional array to Vec",
                array.dims.len()
            )));
        }
        array
            .elements
            .iter()
            .map(|e| T::from_column(e.as_ref()))
            .collect()
    }
}

macro_rules! impl_from_value_variant {
    ($($t:ty => $variant:ident),+) => {
        $(
            impl FromValue for $t {
                fn from_value(value: &Value) -> Result<Self> {
                    match value {
                        Value::$variant(v) => Ok(v.clone()),
                        other => Err(mismatch(other, stringify!($t))),
                    }
                }
            }
        )+
    };
}

impl_from_value_variant!(
    Numeric => Numeric,
    Date => Date,
    Time => Time,
    TimeTz => TimeTz,
    Interval => Interval,
    MacAddr => MacAddr,
    Point => Point,
    Line => Line,
    LineSegment => LineSegment,
    PgBox => Box,
    Path => Path,
    Polygon => Polygon,
    Circle => Circle,
    Uuid => Uuid,
    Tid => Tid,
    BitString => Bits,
    Money => Money,
    Array => Array,
    Composite => Composite,
    Range => Range
);
