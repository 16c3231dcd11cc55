//! Static conversions between Rust types and wire values.
//!
//! [`FromWireValue`] decodes one column straight from the row buffer, and
//! [`ToWireValue`] encodes one Bind parameter for the type the server
//! inferred. Dynamic decoding through the type registry lives in
//! [`crate::types`]; the impls here for owned types route through it.

mod bytes;
mod primitives;
mod row;
mod string;

#[cfg(feature = "with-chrono")]
mod chrono;
#[cfg(feature = "with-rust-decimal")]
mod decimal;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid};
use crate::types::{FromValue, TypeRegistry};

pub use row::FromRow;

/// Decode one column value into a Rust type.
///
/// The OID lets implementations reject incompatible columns with a clear
/// error instead of misreading bytes.
pub trait FromWireValue<'a>: Sized {
    /// Called for SQL NULL. Only nullable targets such as `Option<T>` accept it.
    fn from_null() -> Result<Self> {
        Err(Error::Decode("unexpected NULL value".into()))
    }

    fn from_text(oid: Oid, bytes: &'a [u8]) -> Result<Self>;

    fn from_binary(oid: Oid, bytes: &'a [u8]) -> Result<Self>;
}

/// Encode a Rust value as a Bind parameter.
///
/// `target_oid` is the parameter type from the statement description. When
/// the value's binary form does not match it, implementations pick text
/// format and let the server's input function parse the value.
pub trait ToWireValue {
    /// The OID this value encodes to when the server has not said otherwise.
    /// 0 leaves the type to the server.
    fn natural_oid(&self) -> Oid;

    /// Format code for sending this value as `target_oid`.
    fn format(&self, target_oid: Oid) -> FormatCode {
        let _ = target_oid;
        FormatCode::Binary
    }

    /// Write the length-prefixed value (-1 for NULL) in [`format`](Self::format).
    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<()>;
}

/// A parameter list for one statement execution.
///
/// Object safe, so batches can hold `Box<dyn ToParams>`.
pub trait ToParams {
    fn param_count(&self) -> usize;

    /// Natural OIDs used in Parse when the statement is prepared from this call.
    fn natural_oids(&self) -> Vec<Oid>;

    /// Per-parameter format codes for Bind.
    fn formats(&self, target_oids: &[Oid]) -> Vec<FormatCode>;

    /// Encode every parameter; `target_oids` has `param_count()` entries.
    fn encode(&self, target_oids: &[Oid], buf: &mut Vec<u8>) -> Result<()>;
}

/// Decode through the built-in registry and convert with [`FromValue`].
pub(crate) fn decode_builtin<T: FromValue>(oid: Oid, format: FormatCode, bytes: &[u8]) -> Result<T> {
    let value = TypeRegistry::builtin().decode(oid, format, bytes)?;
    T::from_value(&value)
}

/// Implement [`FromWireValue`] for owned types by way of [`FromValue`].
macro_rules! from_wire_via_value {
    ($($t:ty),+ $(,)?) => {
        $(
            impl $crate::conversion::FromWireValue<'_> for $t {
                fn from_null() -> $crate::error::Result<Self> {
                    <$t as $crate::types::FromValue>::from_null()
                }

                fn from_text(
                    oid: $crate::protocol::types::Oid,
                    bytes: &[u8],
                ) -> $crate::error::Result<Self> {
                    $crate::conversion::decode_builtin(
                        oid,
                        $crate::protocol::types::FormatCode::Text,
                        bytes,
                    )
                }

                fn from_binary(
                    oid: $crate::protocol::types::Oid,
                    bytes: &[u8],
                ) -> $crate::error::Result<Self> {
                    $crate::conversion::decode_builtin(
                        oid,
                        $crate::protocol::types::FormatCode::Binary,
                        bytes,
                    )
                }
            }
        )+
    };
}
pub(crate) use from_wire_via_value;

// === Option<T> ===

impl<'a, T: FromWireValue<'a>> FromWireValue<'a> for Option<T> {
    fn from_null() -> Result<Self> {
        Ok(None)
    }

    fn from_text(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        T::from_text(oid, bytes).map(Some)
    }

    fn from_binary(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        T::from_binary(oid, bytes).map(Some)
    }
}

impl<T: ToWireValue> ToWireValue for Option<T> {
    fn natural_oid(&self) -> Oid {
        match self {
            Some(v) => v.natural_oid(),
            None => 0,
        }
    }

    fn format(&self, target_oid: Oid) -> FormatCode {
        match self {
            Some(v) => v.format(target_oid),
            None => FormatCode::Text,
        }
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            Some(v) => v.encode(target_oid, buf),
            None => {
                buf.extend_from_slice(&(-1_i32).to_be_bytes());
                Ok(())
            }
        }
    }
}

impl<T: ToWireValue + ?Sized> ToWireValue for &T {
    fn natural_oid(&self) -> Oid {
        (*self).natural_oid()
    }

    fn format(&self, target_oid: Oid) -> FormatCode {
        (*self).format(target_oid)
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<()> {
        (*self).encode(target_oid, buf)
    }
}

impl<T: ToWireValue + ?Sized> ToWireValue for Box<T> {
    fn natural_oid(&self) -> Oid {
        self.as_ref().natural_oid()
    }

    fn format(&self, target_oid: Oid) -> FormatCode {
        self.as_ref().format(target_oid)
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<()> {
        self.as_ref().encode(target_oid, buf)
    }
}

// === ToParams ===

impl ToParams for () {
    fn param_count(&self) -> usize {
        0
    }

    fn natural_oids(&self) -> Vec<Oid> {
        vec![]
    }

    fn formats(&self, _target_oids: &[Oid]) -> Vec<FormatCode> {
        vec![]
    }

    fn encode(&self, _target_oids: &[Oid], _buf: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }
}

impl<T: ToParams + ?Sized> ToParams for &T {
    fn param_count(&self) -> usize {
        (*self).param_count()
    }

    fn natural_oids(&self) -> Vec<Oid> {
        (*self).natural_oids()
    }

    fn formats(&self, target_oids: &[Oid]) -> Vec<FormatCode> {
        (*self).formats(target_oids)
    }

    fn encode(&self, target_oids: &[Oid], buf: &mut Vec<u8>) -> Result<()> {
        (*self).encode(target_oids, buf)
    }
}

impl<T: ToParams + ?Sized> ToParams for Box<T> {
    fn param_count(&self) -> usize {
        self.as_ref().param_count()
    }

    fn natural_oids(&self) -> Vec<Oid> {
        self.as_ref().natural_oids()
    }

    fn formats(&self, target_oids: &[Oid]) -> Vec<FormatCode> {
        self.as_ref().formats(target_oids)
    }

    fn encode(&self, target_oids: &[Oid], buf: &mut Vec<u8>) -> Result<()> {
        self.as_ref().encode(target_oids, buf)
    }
}

/// Homogeneous parameter lists, e.g. `Vec<Value>` or `&[&dyn ToWireValue]`.
impl<T: ToWireValue> ToParams for [T] {
    fn param_count(&self) -> usize {
        self.len()
    }

    fn natural_oids(&self) -> Vec<Oid> {
        self.iter().map(ToWireValue::natural_oid).collect()
    }

    fn formats(&self, target_oids: &[Oid]) -> Vec<FormatCode> {
        self.iter()
            .zip(target_oids)
            .map(|(v, oid)| v.format(*oid))
            .collect()
    }

    fn encode(&self, target_oids: &[Oid], buf: &mut Vec<u8>) -> Result<()> {
        for (v, oid) in self.iter().zip(target_oids) {
            v.encode(*oid, buf)?;
        }
        Ok(())
    }
}

impl<T: ToWireValue> ToParams for Vec<T> {
    fn param_count(&self) -> usize {
        self.as_slice().param_count()
    }

    fn natural_oids(&self) -> Vec<Oid> {
        self.as_slice().natural_oids()
    }

    fn formats(&self, target_oids: &[Oid]) -> Vec<FormatCode> {
        self.as_slice().formats(target_oids)
    }

    fn encode(&self, target_oids: &[Oid], buf: &mut Vec<u8>) -> Result<()> {
        self.as_slice().encode(target_oids, buf)
    }
}

macro_rules! impl_to_params {
    ($count:expr, $($idx:tt: $T:ident),+) => {
        impl<$($T: ToWireValue),+> ToParams for ($($T,)+) {
            fn param_count(&self) -> usize {
                $count
            }

            fn natural_oids(&self) -> Vec<Oid> {
                vec![$(self.$idx.natural_oid()),+]
            }

            fn formats(&self, target_oids: &[Oid]) -> Vec<FormatCode> {
                vec![$(self.$idx.format(target_oids.get($idx).copied().unwrap_or(0))),+]
            }

            fn encode(&self, target_oids: &[Oid], buf: &mut Vec<u8>) -> Result<()> {
                $(
                    self.$idx.encode(target_oids.get($idx).copied().unwrap_or(0), buf)?;
                )+
                Ok(())
            }
        }
    };
}

impl_to_params!(1, 0: T0);
impl_to_params!(2, 0: T0, 1: T1);
impl_to_params!(3, 0: T0, 1: T1, 2: T2);
impl_to_params!(4, 0: T0, 1: T1, 2: T2, 3: T3);
impl_to_params!(5, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4);
impl_to_params!(6, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5);
impl_to_params!(7, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6);
impl_to_params!(8, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7);
impl_to_params!(9, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8);
impl_to_params!(10, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9);
impl_to_params!(11, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10);
impl_to_params!(12, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10, 11: T11);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;
    use crate::types::Value;

    #[test]
    fn test_option_null() {
        assert_eq!(<Option<i32> as FromWireValue>::from_null().unwrap(), None);
        assert!(<i32 as FromWireValue>::from_null().is_err());
    }

    #[test]
    fn test_null_param_is_text_without_type() {
        let p: Option<i32> = None;
        assert_eq!(p.natural_oid(), 0);
        assert_eq!(p.format(oid::INT4), FormatCode::Text);
        let mut buf = Vec::new();
        p.encode(oid::INT4, &mut buf).unwrap();
        assert_eq!(buf, (-1_i32).to_be_bytes());
    }

    #[test]
    fn test_tuple_params() {
        let params = (1_i32, "x", None::<i64>);
        assert_eq!(params.natural_oids(), vec![oid::INT4, oid::TEXT, 0]);
        assert_eq!(
            params.formats(&[oid::INT8, oid::INT4, oid::INT8]),
            vec![FormatCode::Binary, FormatCode::Text, FormatCode::Text]
        );
        let mut buf = Vec::new();
        params.encode(&[oid::INT8, oid::INT4, oid::INT8], &mut buf).unwrap();
        assert_eq!(&buf[..4], &8_i32.to_be_bytes());
        assert_eq!(&buf[4..12], &1_i64.to_be_bytes());
        assert_eq!(&buf[12..16], &1_i32.to_be_bytes());
        assert_eq!(buf[16], b'x');
    }

    #[test]
    fn test_dyn_params() {
        let values = vec![Value::Int4(7), Value::Text("a".into())];
        let boxed: Box<dyn ToParams> = Box::new(values);
        assert_eq!(boxed.param_count(), 2);
        assert_eq!(boxed.natural_oids(), vec![oid::INT4, oid::TEXT]);
    }
}
