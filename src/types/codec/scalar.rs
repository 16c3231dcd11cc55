//! Built-in scalar codecs and their dispatch.

use std::fmt;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};

use super::super::registry::{FormatSettings, TypeRegistry};
use super::super::value::Value;
use super::array::Array;
use super::bits::BitString;
use super::datetime::{Date, Time, TimeTz, Timestamp};
use super::geometric::{Circle, Line, LineSegment, Path, PgBox, Point, Polygon, parse_float};
use super::interval::Interval;
use super::money::Money;
use super::network::{Inet, MacAddr};
use super::numeric::Numeric;
use super::{Reader, hstore, utf8};

/// The scalar codec bound to a built-in (or catalog-discovered) type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Bool,
    Int2,
    Int4,
    Int8,
    /// OID, XID and CID
    Oid,
    /// regproc, regclass and regtype: numeric in binary, a name in text
    RegOid,
    Float4,
    Float8,
    Numeric,
    Text,
    Char,
    Bytea,
    Date,
    Time,
    TimeTz,
    Timestamp,
    TimestampTz,
    Interval,
    Inet,
    Cidr,
    MacAddr,
    Point,
    Line,
    LineSegment,
    Box,
    Path,
    Polygon,
    Circle,
    Uuid,
    Json,
    Jsonb,
    Xml,
    Hstore,
    Tid,
    /// BIT and VARBIT
    Bits,
    Money,
    Int2Vector,
    OidVector,
    /// Unknown base type: text format only, surfaced as [`Value::Text`]
    Passthrough,
}

impl Builtin {
    pub fn supports_binary(self, settings: &FormatSettings) -> bool {
        match self {
            Builtin::Passthrough => false,
            // Float-based datetimes use a different binary layout.
            Builtin::Time
            | Builtin::TimeTz
            | Builtin::Timestamp
            | Builtin::TimestampTz
            | Builtin::Interval => settings.integer_datetimes,
            _ => true,
        }
    }

    pub fn decode(self, format: FormatCode, bytes: &[u8], settings: &FormatSettings) -> Result<Value> {
        match format {
            FormatCode::Binary => self.decode_binary(bytes),
            FormatCode::Text => self.decode_text(utf8(bytes)?, settings),
        }
    }

    fn vector_element(self) -> Oid {
        match self {
            Builtin::Int2Vector => oid::INT2,
            _ => oid::OID,
        }
    }

    fn decode_binary(self, bytes: &[u8]) -> Result<Value> {
        Ok(match self {
            Builtin::Bool => Value::Bool(exact::<1>(bytes, "BOOL")?[0] != 0),
            Builtin::Int2 => Value::Int2(i16::from_be_bytes(exact(bytes, "INT2")?)),
            Builtin::Int4 => Value::Int4(i32::from_be_bytes(exact(bytes, "INT4")?)),
            Builtin::Int8 => Value::Int8(i64::from_be_bytes(exact(bytes, "INT8")?)),
            Builtin::Oid | Builtin::RegOid => {
                Value::Oid(u32::from_be_bytes(exact(bytes, "OID")?))
            }
            Builtin::Float4 => Value::Float4(f32::from_be_bytes(exact(bytes, "FLOAT4")?)),
            Builtin::Float8 => Value::Float8(f64::from_be_bytes(exact(bytes, "FLOAT8")?)),
            Builtin::Numeric => Value::Numeric(Numeric::from_binary(bytes)?),
            Builtin::Text => Value::Text(utf8(bytes)?.to_owned()),
            Builtin::Char => Value::Char(bytes.first().copied().unwrap_or(0)),
            Builtin::Bytea => Value::Bytea(bytes.to_vec()),
            Builtin::Date => Value::Date(Date::from_binary(bytes)?),
            Builtin::Time => Value::Time(Time::from_binary(bytes)?),
            Builtin::TimeTz => Value::TimeTz(TimeTz::from_binary(bytes)?),
            Builtin::Timestamp => Value::Timestamp(Timestamp::from_binary(bytes)?),
            Builtin::TimestampTz => Value::TimestampTz(Timestamp::from_binary(bytes)?),
            Builtin::Interval => Value::Interval(Interval::from_binary(bytes)?),
            Builtin::Inet => Value::Inet(Inet::from_binary(bytes)?),
            Builtin::Cidr => Value::Cidr(Inet::from_binary(bytes)?),
            Builtin::MacAddr => Value::MacAddr(MacAddr::from_binary(bytes)?),
            Builtin::Point => Value::Point(Point::from_binary(bytes)?),
            Builtin::Line => Value::Line(Line::from_binary(bytes)?),
            Builtin::LineSegment => Value::LineSegment(LineSegment::from_binary(bytes)?),
            Builtin::Box => Value::Box(PgBox::from_binary(bytes)?),
            Builtin::Path => Value::Path(Path::from_binary(bytes)?),
            Builtin::Polygon => Value::Polygon(Polygon::from_binary(bytes)?),
            Builtin::Circle => Value::Circle(Circle::from_binary(bytes)?),
            Builtin::Uuid => Value::Uuid(
                Uuid::from_slice(bytes).map_err(|e| Error::Decode(format!("invalid UUID: {}", e)))?,
            ),
            Builtin::Json => Value::Json(utf8(bytes)?.to_owned()),
            Builtin::Jsonb => match bytes.split_first() {
                Some((1, body)) => Value::Jsonb(utf8(body)?.to_owned()),
                _ => return Err(Error::Decode("unsupported JSONB binary version".into())),
            },
            Builtin::Xml => Value::Xml(utf8(bytes)?.to_owned()),
            Builtin::Hstore => Value::Hstore(hstore::from_binary(bytes)?),
            Builtin::Tid => Value::Tid(Tid::from_binary(bytes)?),
            Builtin::Bits => Value::Bits(BitString::from_binary(bytes)?),
            Builtin::Money => Value::Money(Money::from_binary(bytes)?),
            Builtin::Int2Vector | Builtin::OidVector => {
                let array = Array::decode_binary(TypeRegistry::builtin(), bytes)?;
                if array.element_oid != self.vector_element() {
                    return Err(Error::Decode(format!(
                        "vector has element type {}",
                        array.element_oid
                    )));
                }
                Value::Array(array)
            }
            Builtin::Passthrough => {
                return Err(Error::Decode(
                    "binary format is not supported for this type".into(),
                ));
            }
        })
    }

    fn decode_text(self, s: &str, settings: &FormatSettings) -> Result<Value> {
        let invalid = |what: &str| Error::Decode(format!("invalid {}: {:?}", what, s));
        if matches!(
            self,
            Builtin::Date | Builtin::Timestamp | Builtin::TimestampTz
        ) && !settings.iso_dates()
        {
            return Err(Error::Decode(format!(
                "DateStyle {:?} is not supported for text results",
                settings.date_style
            )));
        }
        if self == Builtin::Interval && settings.interval_style.eq_ignore_ascii_case("sql_standard") {
            return Err(Error::Decode(
                "IntervalStyle sql_standard is not supported for text results".into(),
            ));
        }
        Ok(match self {
            Builtin::Bool => match s {
                "t" | "true" | "TRUE" | "1" => Value::Bool(true),
                "f" | "false" | "FALSE" | "0" => Value::Bool(false),
                _ => return Err(invalid("BOOL")),
            },
            Builtin::Int2 => Value::Int2(s.trim().parse().map_err(|_| invalid("INT2"))?),
            Builtin::Int4 => Value::Int4(s.trim().parse().map_err(|_| invalid("INT4"))?),
            Builtin::Int8 => Value::Int8(s.trim().parse().map_err(|_| invalid("INT8"))?),
            Builtin::Oid => Value::Oid(s.trim().parse().map_err(|_| invalid("OID"))?),
            Builtin::RegOid => match s.parse() {
                Ok(oid) => Value::Oid(oid),
                Err(_) => Value::Text(s.to_owned()),
            },
            Builtin::Float4 => Value::Float4(parse_float(s).ok_or_else(|| invalid("FLOAT4"))? as f32),
            Builtin::Float8 => Value::Float8(parse_float(s).ok_or_else(|| invalid("FLOAT8"))?),
            Builtin::Numeric => Value::Numeric(s.parse()?),
            Builtin::Text => Value::Text(s.to_owned()),
            Builtin::Char => Value::Char(parse_char(s).ok_or_else(|| invalid("CHAR"))?),
            Builtin::Bytea => Value::Bytea(parse_bytea(s)?),
            Builtin::Date => Value::Date(Date::parse(s)?),
            Builtin::Time => Value::Time(Time::parse(s)?),
            Builtin::TimeTz => Value::TimeTz(TimeTz::parse(s)?),
            Builtin::Timestamp => Value::Timestamp(Timestamp::parse(s)?),
            Builtin::TimestampTz => Value::TimestampTz(Timestamp::parse_tz(s)?),
            Builtin::Interval => Value::Interval(Interval::parse(s)?),
            Builtin::Inet => Value::Inet(Inet::parse(s)?),
            Builtin::Cidr => Value::Cidr(Inet::parse(s)?),
            Builtin::MacAddr => Value::MacAddr(MacAddr::parse(s)?),
            Builtin::Point => Value::Point(Point::parse(s)?),
            Builtin::Line => Value::Line(Line::parse(s)?),
            Builtin::LineSegment => Value::LineSegment(LineSegment::parse(s)?),
            Builtin::Box => Value::Box(PgBox::parse(s)?),
            Builtin::Path => Value::Path(Path::parse(s)?),
            Builtin::Polygon => Value::Polygon(Polygon::parse(s)?),
            Builtin::Circle => Value::Circle(Circle::parse(s)?),
            Builtin::Uuid => Value::Uuid(Uuid::parse_str(s).map_err(|_| invalid("UUID"))?),
            Builtin::Json => Value::Json(s.to_owned()),
            Builtin::Jsonb => Value::Jsonb(s.to_owned()),
            Builtin::Xml => Value::Xml(s.to_owned()),
            Builtin::Hstore => Value::Hstore(hstore::parse(s)?),
            Builtin::Tid => Value::Tid(Tid::parse(s)?),
            Builtin::Bits => Value::Bits(BitString::parse(s)?),
            Builtin::Money => Value::Money(Money::parse(s)?),
            Builtin::Int2Vector | Builtin::OidVector => Value::Array(Array::decode_vector_text(
                TypeRegistry::builtin(),
                self.vector_element(),
                s,
            )?),
            Builtin::Passthrough => Value::Text(s.to_owned()),
        })
    }
}

/// A fixed-width binary value; any other length is a decode error.
fn exact<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| Error::Decode(format!("invalid {} length: {}", what, bytes.len())))
}

/// `"char"` text: one byte, empty for `\0`, or a `\ooo` octal escape.
fn parse_char(s: &str) -> Option<u8> {
    match s.as_bytes() {
        [] => Some(0),
        [b] => Some(*b),
        [b'\\', digits @ ..] if digits.len() == 3 => {
            u8::from_str_radix(std::str::from_utf8(digits).ok()?, 8).ok()
        }
        _ => None,
    }
}

/// BYTEA text in hex (`\x0a0b`) or the legacy escape format.
pub(crate) fn parse_bytea(s: &str) -> Result<Vec<u8>> {
    let invalid = || Error::Decode(format!("invalid BYTEA text: {:?}", s));
    if let Some(hex) = s.strip_prefix("\\x") {
        if hex.len() % 2 != 0 {
            return Err(invalid());
        }
        return (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid()))
            .collect();
    }
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
        } else if bytes.get(i + 1) == Some(&b'\\') {
            out.push(b'\\');
            i += 2;
        } else {
            let octal = s.get(i + 1..i + 4).ok_or_else(invalid)?;
            out.push(u8::from_str_radix(octal, 8).map_err(|_| invalid())?);
            i += 4;
        }
    }
    Ok(out)
}

pub(crate) fn format_bytea(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// A physical row location: block number and tuple index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tid {
    pub block: u32,
    pub offset: u16,
}

impl Tid {
    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes, "TID");
        let block = r.u32()?;
        let offset = r.u16()?;
        r.finish()?;
        Ok(Self { block, offset })
    }

    pub fn write_binary(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.block.to_be_bytes());
        buf.extend_from_slice(&self.offset.to_be_bytes());
    }

    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || Error::Decode(format!("invalid TID: {:?}", s));
        let inner = s
            .trim()
            .strip_prefix('(')
            .and_then(|r| r.strip_suffix(')'))
            .ok_or_else(invalid)?;
        let (block, offset) = inner.split_once(',').ok_or_else(invalid)?;
        Ok(Self {
            block: block.trim().parse().map_err(|_| invalid())?,
            offset: offset.trim().parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.block, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;

    fn settings() -> FormatSettings {
        FormatSettings::default()
    }

    /// Encode through `Value`, decode through the codec, in both formats.
    fn roundtrip(kind: Builtin, value: Value) {
        let s = settings();
        let mut buf = Vec::new();
        value.write_binary(0, &mut buf).unwrap();
        assert_eq!(kind.decode(FormatCode::Binary, &buf, &s).unwrap(), value, "binary");
        let text = value.to_string();
        assert_eq!(
            kind.decode(FormatCode::Text, text.as_bytes(), &s).unwrap(),
            value,
            "text {:?}",
            text
        );
    }

    #[test]
    fn test_integer_boundaries() {
        roundtrip(Builtin::Int2, Value::Int2(i16::MIN));
        roundtrip(Builtin::Int4, Value::Int4(i32::MIN));
        roundtrip(Builtin::Int4, Value::Int4(i32::MAX));
        roundtrip(Builtin::Int8, Value::Int8(i64::MIN));
        roundtrip(Builtin::Int8, Value::Int8(123_456_789_012_345_678));
    }

    #[test]
    fn test_numeric_values() {
        for text in ["0", "-99999.2", "123456789012345678", "-2147483648"] {
            roundtrip(Builtin::Numeric, Value::Numeric(text.parse().unwrap()));
        }
    }

    #[test]
    fn test_scalars() {
        roundtrip(Builtin::Bool, Value::Bool(false));
        roundtrip(Builtin::Float8, Value::Float8(0.1));
        roundtrip(Builtin::Float4, Value::Float4(-2.5));
        roundtrip(Builtin::Text, Value::Text("héllo".into()));
        roundtrip(Builtin::Bytea, Value::Bytea(vec![0, 1, 0xff]));
        roundtrip(Builtin::Char, Value::Char(b'r'));
        roundtrip(Builtin::Uuid, Value::Uuid(Uuid::from_u128(0x1234)));
        roundtrip(Builtin::Jsonb, Value::Jsonb(r#"{"a": 1}"#.into()));
        roundtrip(Builtin::Xml, Value::Xml("<a/>".into()));
        roundtrip(Builtin::Tid, Value::Tid(Tid { block: 7, offset: 3 }));
        roundtrip(
            Builtin::MacAddr,
            Value::MacAddr(MacAddr([8, 0, 0x2b, 1, 2, 3])),
        );
    }

    #[test]
    fn test_temporal_and_network() {
        roundtrip(Builtin::Date, Value::Date(Date::parse("1999-12-31").unwrap()));
        roundtrip(Builtin::Date, Value::Date(Date::INFINITY));
        roundtrip(Builtin::Time, Value::Time(Time::parse("23:59:59.999999").unwrap()));
        roundtrip(
            Builtin::TimestampTz,
            Value::TimestampTz(Timestamp::parse("2024-06-01 12:00:00").unwrap()),
        );
        roundtrip(Builtin::Interval, Value::Interval(Interval::new(14, -3, 1_500_000)));
        roundtrip(Builtin::Inet, Value::Inet(Inet::parse("10.1.2.3").unwrap()));
        roundtrip(Builtin::Cidr, Value::Cidr(Inet::parse("10.0.0.0/8").unwrap()));
        roundtrip(Builtin::Circle, Value::Circle(Circle::parse("<(0,0),2>").unwrap()));
    }

    #[test]
    fn test_bits_money_line() {
        roundtrip(Builtin::Bits, Value::Bits(BitString::parse("10110").unwrap()));
        roundtrip(Builtin::Money, Value::Money(Money(-123456)));
        roundtrip(Builtin::Line, Value::Line(Line::parse("{1,2,-3}").unwrap()));
        let money = Builtin::Money
            .decode(FormatCode::Text, "$1,000.25".as_bytes(), &settings())
            .unwrap();
        assert_eq!(money, Value::Money(Money(100025)));
    }

    #[test]
    fn test_vectors() {
        let s = settings();
        let value = Builtin::Int2Vector.decode(FormatCode::Text, b"1 2", &s).unwrap();
        let Value::Array(array) = &value else {
            panic!("expected an array, got {:?}", value);
        };
        assert_eq!(array.element_oid, oid::INT2);
        assert_eq!(array.elements, vec![Some(Value::Int2(1)), Some(Value::Int2(2))]);

        let mut buf = Vec::new();
        array.write_vector_binary(&mut buf).unwrap();
        assert_eq!(Builtin::Int2Vector.decode(FormatCode::Binary, &buf, &s).unwrap(), value);
        assert!(Builtin::OidVector.decode(FormatCode::Binary, &buf, &s).is_err());

        let oids = Builtin::OidVector.decode(FormatCode::Text, b"23 4294967295", &s).unwrap();
        assert_eq!(
            oids.as_array().unwrap().elements[1],
            Some(Value::Oid(u32::MAX))
        );
        let empty = Builtin::OidVector.decode(FormatCode::Text, b"", &s).unwrap();
        assert!(empty.as_array().unwrap().elements.is_empty());
    }

    #[test]
    fn test_bytea_text_forms() {
        assert_eq!(parse_bytea("\\xdeadbeef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(parse_bytea("a\\000b\\\\").unwrap(), vec![b'a', 0, b'b', b'\\']);
        assert!(parse_bytea("\\xabc").is_err());
    }

    #[test]
    fn test_regclass_text_is_name() {
        let v = Builtin::RegOid
            .decode(FormatCode::Text, b"pg_type", &settings())
            .unwrap();
        assert_eq!(v, Value::Text("pg_type".into()));
        let v = Builtin::RegOid
            .decode(FormatCode::Binary, &oid::BOOL.to_be_bytes(), &settings())
            .unwrap();
        assert_eq!(v, Value::Oid(oid::BOOL));
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(Builtin::Int4.decode(FormatCode::Binary, &[0, 1], &settings()).is_err());
        assert!(Builtin::Int4.decode(FormatCode::Binary, &[0, 0, 0, 0, 1], &settings()).is_err());
    }

    #[test]
    fn test_non_iso_datestyle_rejected() {
        let mut s = settings();
        s.date_style = "German, DMY".into();
        assert!(Builtin::Date.decode(FormatCode::Text, b"31.12.1999", &s).is_err());
        assert!(Builtin::Date.decode(FormatCode::Binary, &0i32.to_be_bytes(), &s).is_ok());
    }
}
