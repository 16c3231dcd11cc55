//! `&[u8]` and `Vec<u8>` as BYTEA.

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};
use crate::types::codec::scalar::{format_bytea, parse_bytea};

use super::{FromWireValue, ToWireValue};

impl<'a> FromWireValue<'a> for &'a [u8] {
    /// Binary only: the text form of BYTEA is escaped and needs decoding.
    fn from_text(oid: Oid, _bytes: &'a [u8]) -> Result<Self> {
        Err(Error::Decode(format!(
            "cannot borrow text oid {} as bytes; decode into Vec<u8>",
            oid
        )))
    }

    fn from_binary(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        if oid != oid::BYTEA {
            return Err(Error::Decode(format!("cannot decode oid {} as bytes", oid)));
        }
        Ok(bytes)
    }
}

impl FromWireValue<'_> for Vec<u8> {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::BYTEA {
            return Err(Error::Decode(format!("cannot decode oid {} as Vec<u8>", oid)));
        }
        parse_bytea(crate::types::codec::utf8(bytes)?)
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        <&[u8]>::from_binary(oid, bytes).map(<[u8]>::to_vec)
    }
}

impl ToWireValue for [u8] {
    fn natural_oid(&self) -> Oid {
        oid::BYTEA
    }

    fn format(&self, target_oid: Oid) -> FormatCode {
        if matches!(target_oid, 0 | oid::BYTEA) {
            FormatCode::Binary
        } else {
            FormatCode::Text
        }
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<()> {
        let hex;
        let data = match self.format(target_oid) {
            FormatCode::Binary => self,
            FormatCode::Text => {
                hex = format_bytea(self);
                hex.as_bytes()
            }
        };
        let len = i32::try_from(data.len())
            .map_err(|_| Error::Encode("bytea parameter too large".into()))?;
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(data);
        Ok(())
    }
}

impl ToWireValue for Vec<u8> {
    fn natural_oid(&self) -> Oid {
        oid::BYTEA
    }

    fn format(&self, target_oid: Oid) -> FormatCode {
        self.as_slice().format(target_oid)
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<()> {
        self.as_slice().encode(target_oid, buf)
    }
}
