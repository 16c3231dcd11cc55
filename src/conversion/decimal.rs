//! `rust_decimal::Decimal` as NUMERIC.
//!
//! Conversion goes through [`Numeric`]'s text form, which keeps the scale.
//! NaN and infinities have no `Decimal` counterpart.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};
use crate::types::{FromValue, Numeric, Value};

use super::{ToWireValue, from_wire_via_value};

impl FromValue for Decimal {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Numeric(n) if n.is_nan() || n.is_infinite() => Err(Error::Conversion(format!(
                "{} cannot be represented as Decimal",
                n
            ))),
            Value::Numeric(n) => Decimal::from_str_exact(&n.to_string())
                .map_err(|e| Error::Conversion(format!("NUMERIC {} does not fit Decimal: {}", n, e))),
            Value::Int2(v) => Ok(Decimal::from(*v)),
            Value::Int4(v) => Ok(Decimal::from(*v)),
            Value::Int8(v) => Ok(Decimal::from(*v)),
            other => Err(Error::Conversion(format!("cannot convert {:?} to Decimal", other))),
        }
    }
}

from_wire_via_value!(Decimal);

fn to_numeric(d: &Decimal) -> Result<Numeric> {
    Numeric::from_str(&d.to_string())
}

impl ToWireValue for Decimal {
    fn natural_oid(&self) -> Oid {
        oid::NUMERIC
    }

    fn format(&self, target_oid: Oid) -> FormatCode {
        match to_numeric(self) {
            Ok(n) => ToWireValue::format(&Value::Numeric(n), target_oid),
            Err(_) => FormatCode::Text,
        }
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<()> {
        Value::Numeric(to_numeric(self)?).encode(target_oid, buf)
    }
}
