//! `&str` and `String`.
//!
//! A string parameter is sent as-is for any target type: binary for the
//! text family (where both formats coincide) and text otherwise, so the
//! server applies the target type's input function.

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};
use crate::types::codec::utf8;

use super::{FromWireValue, ToWireValue, decode_builtin};

/// Types whose binary representation is the UTF-8 text itself.
fn is_textual(oid: Oid) -> bool {
    matches!(
        oid,
        oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME | oid::UNKNOWN | oid::JSON | oid::XML
    )
}

impl<'a> FromWireValue<'a> for &'a str {
    /// Text results of any type borrow directly.
    fn from_text(_oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        utf8(bytes)
    }

    fn from_binary(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        if !is_textual(oid) {
            return Err(Error::Decode(format!(
                "cannot borrow binary oid {} as str",
                oid
            )));
        }
        utf8(bytes)
    }
}

impl FromWireValue<'_> for String {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid == oid::BYTEA {
            return Err(Error::Conversion("BYTEA cannot be read as String".into()));
        }
        Ok(utf8(bytes)?.to_owned())
    }

    /// Non-textual binary columns are decoded and printed in text form.
    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if is_textual(oid) {
            return Ok(utf8(bytes)?.to_owned());
        }
        decode_builtin(oid, FormatCode::Binary, bytes)
    }
}

impl ToWireValue for str {
    fn natural_oid(&self) -> Oid {
        oid::TEXT
    }

    fn format(&self, target_oid: Oid) -> FormatCode {
        if target_oid == 0 || is_textual(target_oid) {
            FormatCode::Binary
        } else {
            FormatCode::Text
        }
    }

    fn encode(&self, _target_oid: Oid, buf: &mut Vec<u8>) -> Result<()> {
        let len = i32::try_from(self.len())
            .map_err(|_| Error::Encode("string parameter too large".into()))?;
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(self.as_bytes());
        Ok(())
    }
}

impl ToWireValue for String {
    fn natural_oid(&self) -> Oid {
        oid::TEXT
    }

    fn format(&self, target_oid: Oid) -> FormatCode {
        self.as_str().format(target_oid)
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<()> {
        self.as_str().encode(target_oid, buf)
    }
}
