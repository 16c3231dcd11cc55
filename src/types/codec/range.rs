//! Range types (`int4range`, `tstzrange`, user-defined ranges).

use std::fmt;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid};

use super::super::registry::TypeRegistry;
use super::super::value::Value;
use super::{Reader, Scanner, push_quoted, write_nested};

const RANGE_EMPTY: u8 = 0x01;
const RANGE_LB_INC: u8 = 0x02;
const RANGE_UB_INC: u8 = 0x04;
const RANGE_LB_INF: u8 = 0x08;
const RANGE_UB_INF: u8 = 0x10;

#[derive(Debug, Clone, PartialEq)]
pub enum RangeBound {
    Unbounded,
    Inclusive(Box<Value>),
    Exclusive(Box<Value>),
}

impl RangeBound {
    pub(crate) fn value(&self) -> Option<&Value> {
        match self {
            RangeBound::Unbounded => None,
            RangeBound::Inclusive(v) | RangeBound::Exclusive(v) => Some(v),
        }
    }

    fn bound(value: Value, inclusive: bool) -> Self {
        if inclusive {
            RangeBound::Inclusive(Box::new(value))
        } else {
            RangeBound::Exclusive(Box::new(value))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    pub type_oid: Oid,
    pub subtype_oid: Oid,
    /// An empty range has both bounds `Unbounded`.
    pub empty: bool,
    pub lower: RangeBound,
    pub upper: RangeBound,
}

impl Range {
    pub fn empty(type_oid: Oid, subtype_oid: Oid) -> Self {
        Self {
            type_oid,
            subtype_oid,
            empty: true,
            lower: RangeBound::Unbounded,
            upper: RangeBound::Unbounded,
        }
    }

    pub fn new(type_oid: Oid, subtype_oid: Oid, lower: RangeBound, upper: RangeBound) -> Self {
        Self {
            type_oid,
            subtype_oid,
            empty: false,
            lower,
            upper,
        }
    }

    pub fn decode_binary(
        registry: &TypeRegistry,
        type_oid: Oid,
        subtype_oid: Oid,
        bytes: &[u8],
    ) -> Result<Self> {
        let mut r = Reader::new(bytes, "range");
        let flags = r.u8()?;
        if flags & RANGE_EMPTY != 0 {
            r.finish()?;
            return Ok(Self::empty(type_oid, subtype_oid));
        }
        let mut read_bound = |infinite: u8, inclusive: u8| -> Result<RangeBound> {
            if flags & infinite != 0 {
                return Ok(RangeBound::Unbounded);
            }
            let raw = r
                .field()?
                .ok_or_else(|| Error::Decode("NULL range bound".into()))?;
            let value = registry.decode(subtype_oid, FormatCode::Binary, raw)?;
            Ok(RangeBound::bound(value, flags & inclusive != 0))
        };
        let lower = read_bound(RANGE_LB_INF, RANGE_LB_INC)?;
        let upper = read_bound(RANGE_UB_INF, RANGE_UB_INC)?;
        r.finish()?;
        Ok(Self::new(type_oid, subtype_oid, lower, upper))
    }

    /// Parse `empty`, or `[a,b)` style text where a missing bound is infinite.
    pub fn decode_text(
        registry: &TypeRegistry,
        type_oid: Oid,
        subtype_oid: Oid,
        text: &str,
    ) -> Result<Self> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("empty") {
            return Ok(Self::empty(type_oid, subtype_oid));
        }
        let mut scan = Scanner::new(text);
        let lower_inc = match scan.bump() {
            Some('[') => true,
            Some('(') => false,
            _ => return Err(scan.error("expected '[' or '('")),
        };
        let lower = bound_token(&mut scan, &[','])?;
        scan.expect(',')?;
        let upper = bound_token(&mut scan, &[']', ')'])?;
        let upper_inc = match scan.bump() {
            Some(']') => true,
            Some(')') => false,
            _ => return Err(scan.error("expected ']' or ')'")),
        };
        if !scan.is_eof() {
            return Err(scan.error("trailing characters after range"));
        }

        let decode = |token: Option<String>, inclusive: bool| -> Result<RangeBound> {
            match token {
                None => Ok(RangeBound::Unbounded),
                Some(t) => {
                    let value = registry.decode(subtype_oid, FormatCode::Text, t.as_bytes())?;
                    Ok(RangeBound::bound(value, inclusive))
                }
            }
        };
        Ok(Self::new(
            type_oid,
            subtype_oid,
            decode(lower, lower_inc)?,
            decode(upper, upper_inc)?,
        ))
    }

    pub fn write_binary(&self, buf: &mut Vec<u8>) -> Result<()> {
        if self.empty {
            buf.push(RANGE_EMPTY);
            return Ok(());
        }
        let mut flags = 0u8;
        match &self.lower {
            RangeBound::Unbounded => flags |= RANGE_LB_INF,
            RangeBound::Inclusive(_) => flags |= RANGE_LB_INC,
            RangeBound::Exclusive(_) => {}
        }
        match &self.upper {
            RangeBound::Unbounded => flags |= RANGE_UB_INF,
            RangeBound::Inclusive(_) => flags |= RANGE_UB_INC,
            RangeBound::Exclusive(_) => {}
        }
        buf.push(flags);
        for bound in [&self.lower, &self.upper] {
            if let Some(v) = bound.value() {
                write_nested(buf, |b| v.write_binary(self.subtype_oid, b))?;
            }
        }
        Ok(())
    }
}

/// A bound: quoted, unquoted, or absent (infinite).
fn bound_token(scan: &mut Scanner<'_>, stops: &[char]) -> Result<Option<String>> {
    if scan.peek() == Some('"') {
        return scan.quoted(true).map(Some);
    }
    let (token, escaped) = scan.unquoted(stops)?;
    Ok((escaped || !token.is_empty()).then_some(token))
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.empty {
            return f.write_str("empty");
        }
        let mut out = String::new();
        out.push(if matches!(self.lower, RangeBound::Inclusive(_)) { '[' } else { '(' });
        if let Some(v) = self.lower.value() {
            push_quoted(&mut out, &v.to_string());
        }
        out.push(',');
        if let Some(v) = self.upper.value() {
            push_quoted(&mut out, &v.to_string());
        }
        out.push(if matches!(self.upper, RangeBound::Inclusive(_)) { ']' } else { ')' });
        f.write_str(&out)
    }
}
