//! Decoding whole rows into tuples.

use crate::conversion::FromWireValue;
use crate::error::{Error, Result};
use crate::protocol::backend::query::DataRow;
use crate::protocol::types::FormatCode;
use crate::statement::ColumnInfo;

/// Decode a row into a Rust type.
///
/// Each column is decoded in the format it arrived in, so the same impl
/// serves simple-query (text) and extended-query (mixed) results.
pub trait FromRow<'a>: Sized {
    fn from_row(cols: &[ColumnInfo], row: DataRow<'a>) -> Result<Self>;
}

fn decode_column<'a, T: FromWireValue<'a>>(col: &ColumnInfo, value: Option<&'a [u8]>) -> Result<T> {
    let decoded = match value {
        None => T::from_null(),
        Some(bytes) => match col.format {
            FormatCode::Text => T::from_text(col.type_oid, bytes),
            FormatCode::Binary => T::from_binary(col.type_oid, bytes),
        },
    };
    decoded.map_err(|e| match e {
        Error::Decode(msg) => Error::Decode(format!("column \"{}\": {}", col.name, msg)),
        Error::Conversion(msg) => Error::Conversion(format!("column \"{}\": {}", col.name, msg)),
        other => other,
    })
}

/// Statements without a result set.
impl FromRow<'_> for () {
    fn from_row(_cols: &[ColumnInfo], _row: DataRow<'_>) -> Result<Self> {
        Ok(())
    }
}

macro_rules! impl_from_row_tuple {
    ($count:literal: $($idx:tt => $T:ident),+) => {
        impl<'a, $($T: FromWireValue<'a>),+> FromRow<'a> for ($($T,)+) {
            fn from_row(cols: &[ColumnInfo], row: DataRow<'a>) -> Result<Self> {
                if cols.len() != $count || row.len() != $count {
                    return Err(Error::Decode(format!(
                        "row has {} columns, tuple expects {}",
                        row.len(),
                        $count
                    )));
                }
                let mut values = row.iter();
                Ok(($(
                    decode_column::<$T>(&cols[$idx], values.next().flatten())?,
                )+))
            }
        }
    };
}

impl_from_row_tuple!(1: 0 => T1);
impl_from_row_tuple!(2: 0 => T1, 1 => T2);
impl_from_row_tuple!(3: 0 => T1, 1 => T2, 2 => T3);
impl_from_row_tuple!(4: 0 => T1, 1 => T2, 2 => T3, 3 => T4);
impl_from_row_tuple!(5: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5);
impl_from_row_tuple!(6: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6);
impl_from_row_tuple!(7: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7);
impl_from_row_tuple!(8: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8);
impl_from_row_tuple!(9: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8, 8 => T9);
impl_from_row_tuple!(10: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8, 8 => T9, 9 => T10);
impl_from_row_tuple!(11: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8, 8 => T9, 9 => T10, 10 => T11);
impl_from_row_tuple!(12: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8, 8 => T9, 9 => T10, 10 => T11, 11 => T12);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;

    fn column(name: &str, type_oid: u32, format: FormatCode) -> ColumnInfo {
        ColumnInfo {
            name: name.into(),
            table_oid: 0,
            column_id: 0,
            type_oid,
            type_size: -1,
            type_modifier: -1,
            format,
        }
    }

    fn data_row(values: &[Option<&[u8]>]) -> Vec<u8> {
        let mut payload = (values.len() as u16).to_be_bytes().to_vec();
        for v in values {
            match v {
                Some(bytes) => {
                    payload.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                    payload.extend_from_slice(bytes);
                }
                None => payload.extend_from_slice(&(-1_i32).to_be_bytes()),
            }
        }
        payload
    }

    #[test]
    fn test_mixed_formats() {
        let cols = [
            column("id", oid::INT4, FormatCode::Binary),
            column("name", oid::TEXT, FormatCode::Text),
            column("note", oid::TEXT, FormatCode::Text),
        ];
        let payload = data_row(&[Some(&7_i32.to_be_bytes()), Some(b"alice"), None]);
        let row = DataRow::parse(&payload).unwrap();
        let (id, name, note): (i32, &str, Option<String>) = FromRow::from_row(&cols, row).unwrap();
        assert_eq!((id, name, note), (7, "alice", None));
    }

    #[test]
    fn test_null_into_non_option_names_column() {
        let cols = [column("total", oid::INT8, FormatCode::Text)];
        let payload = data_row(&[None]);
        let row = DataRow::parse(&payload).unwrap();
        let err = <(i64,)>::from_row(&cols, row).unwrap_err();
        assert!(err.to_string().contains("total"));
    }

    #[test]
    fn test_column_count_mismatch() {
        let cols = [column("a", oid::INT4, FormatCode::Text)];
        let payload = data_row(&[Some(b"1")]);
        let row = DataRow::parse(&payload).unwrap();
        assert!(<(i32, i32)>::from_row(&cols, row).is_err());
    }
}
