//! Composite (row) values.
//!
//! Binary layout: `int32 field_count` then per field `uint32 oid`,
//! `int32 length` and the bytes (-1 for NULL). Text is the record literal
//! `(a,"b c",)`, where an empty unquoted field is NULL.

use std::fmt;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid};

use super::super::registry::TypeRegistry;
use super::super::value::Value;
use super::{Reader, Scanner, push_quoted, write_nested};

#[derive(Debug, Clone, PartialEq)]
pub struct Composite {
    /// The composite type, or RECORD for anonymous rows.
    pub type_oid: Oid,
    /// `(field type OID, value)` in attribute order.
    pub fields: Vec<(Oid, Option<Value>)>,
}

impl Composite {
    pub fn new(type_oid: Oid, fields: Vec<(Oid, Option<Value>)>) -> Self {
        Self { type_oid, fields }
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.fields.get(idx).and_then(|(_, v)| v.as_ref())
    }

    pub fn decode_binary(registry: &TypeRegistry, type_oid: Oid, bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes, "record");
        let count = r.i32()?;
        if count < 0 {
            return Err(Error::Decode(format!("negative record field count {}", count)));
        }
        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let field_oid = r.u32()?;
            let value = match r.field()? {
                Some(raw) => Some(registry.decode(field_oid, FormatCode::Binary, raw)?),
                None => None,
            };
            fields.push((field_oid, value));
        }
        r.finish()?;
        Ok(Self { type_oid, fields })
    }

    /// Parse a record literal against the declared field types.
    pub fn decode_text(
        registry: &TypeRegistry,
        type_oid: Oid,
        field_oids: &[Oid],
        text: &str,
    ) -> Result<Self> {
        let mut scan = Scanner::new(text.trim());
        scan.expect('(')?;
        let mut fields = Vec::with_capacity(field_oids.len());
        for (i, field_oid) in field_oids.iter().enumerate() {
            if i > 0 {
                scan.expect(',')?;
            }
            let raw = if scan.peek() == Some('"') {
                Some(scan.quoted(true)?)
            } else {
                let (token, escaped) = scan.unquoted(&[',', ')'])?;
                (escaped || !token.is_empty()).then_some(token)
            };
            let value = match raw {
                Some(raw) => Some(registry.decode(*field_oid, FormatCode::Text, raw.as_bytes())?),
                None => None,
            };
            fields.push((*field_oid, value));
        }
        scan.expect(')')?;
        if !scan.is_eof() {
            return Err(scan.error("trailing characters after record"));
        }
        Ok(Self { type_oid, fields })
    }

    pub fn write_binary(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&(self.fields.len() as i32).to_be_bytes());
        for (field_oid, value) in &self.fields {
            buf.extend_from_slice(&field_oid.to_be_bytes());
            match value {
                Some(v) => write_nested(buf, |b| v.write_binary(*field_oid, b))?,
                None => buf.extend_from_slice(&(-1_i32).to_be_bytes()),
            }
        }
        Ok(())
    }
}

/// Record literal with every non-NULL field quoted.
impl fmt::Display for Composite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::from("(");
        for (i, (_, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            if let Some(v) = value {
                push_quoted(&mut out, &v.to_string());
            }
        }
        out.push(')');
        f.write_str(&out)
    }
}
