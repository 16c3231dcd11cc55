//! Dynamically typed rows decoded through the type registry.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::handler::RawRow;
use crate::statement::ColumnInfo;
use crate::types::{FromValue, TypeRegistry, Value};

/// A decoded result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[ColumnInfo]>,
    values: Vec<Option<Value>>,
}

impl Row {
    pub fn new(columns: Arc<[ColumnInfo]>, values: Vec<Option<Value>>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of column `idx`; `None` for SQL NULL or an index past the end.
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx).and_then(Option::as_ref)
    }

    /// Value of the first column called `name`.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.index_of(name).and_then(|idx| self.get(idx))
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Convert column `idx` with range checking.
    pub fn try_get<T: FromValue>(&self, idx: usize) -> Result<T> {
        let slot = self.values.get(idx).ok_or_else(|| {
            Error::InvalidUsage(format!(
                "column index {} out of range for a row of {} columns",
                idx,
                self.values.len()
            ))
        })?;
        T::from_column(slot.as_ref()).map_err(|e| match e {
            Error::Conversion(msg) => {
                Error::Conversion(format!("column \"{}\": {}", self.columns[idx].name, msg))
            }
            other => other,
        })
    }

    pub fn try_get_by_name<T: FromValue>(&self, name: &str) -> Result<T> {
        let idx = self
            .index_of(name)
            .ok_or_else(|| Error::InvalidUsage(format!("no column named \"{}\"", name)))?;
        self.try_get(idx)
    }

    pub fn into_values(self) -> Vec<Option<Value>> {
        self.values
    }
}

/// Decode raw rows with `registry`.
///
/// Fails with [`Error::UnsupportedType`] on the first OID the registry does
/// not know, so the caller can load it from the catalog and try again.
pub fn decode_rows(registry: &TypeRegistry, raw: &[RawRow]) -> Result<Vec<Row>> {
    raw.iter().map(|r| decode_row(registry, r)).collect()
}

fn decode_row(registry: &TypeRegistry, raw: &RawRow) -> Result<Row> {
    let data = raw.data()?;
    if data.len() != raw.columns.len() {
        return Err(Error::Protocol(format!(
            "DataRow has {} columns, RowDescription announced {}",
            data.len(),
            raw.columns.len()
        )));
    }
    let values = data
        .iter()
        .zip(raw.columns.iter())
        .map(|(bytes, col)| {
            bytes
                .map(|b| registry.decode(col.type_oid, col.format, b))
                .transpose()
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::new(Arc::clone(&raw.columns), values))
}

/// Column type OIDs the registry cannot decode yet.
pub fn unknown_column_types(registry: &TypeRegistry, raw: &[RawRow]) -> Vec<u32> {
    let mut seen: Vec<u32> = Vec::new();
    let mut last: Option<&Arc<[ColumnInfo]>> = None;
    for row in raw {
        if last.is_some_and(|prev| Arc::ptr_eq(prev, &row.columns)) {
            continue;
        }
        last = Some(&row.columns);
        for col in row.columns.iter() {
            if !registry.contains(col.type_oid) && !seen.contains(&col.type_oid) {
                seen.push(col.type_oid);
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::{FormatCode, oid};

    fn col(name: &str, type_oid: u32, format: FormatCode) -> ColumnInfo {
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

    fn raw(columns: Arc<[ColumnInfo]>, values: &[Option<&[u8]>]) -> RawRow {
        let mut payload = (values.len() as u16).to_be_bytes().to_vec();
        for v in values {
            match v {
                Some(b) => {
                    payload.extend_from_slice(&(b.len() as i32).to_be_bytes());
                    payload.extend_from_slice(b);
                }
                None => payload.extend_from_slice(&(-1_i32).to_be_bytes()),
            }
        }
        RawRow { columns, payload }
    }

    #[test]
    fn test_decode_and_access() {
        let registry = TypeRegistry::default();
        let cols: Arc<[ColumnInfo]> = vec![
            col("id", oid::INT8, FormatCode::Binary),
            col("name", oid::TEXT, FormatCode::Text),
            col("gone", oid::INT4, FormatCode::Text),
        ]
        .into();
        let rows = decode_rows(
            &registry,
            &[raw(cols, &[Some(&5_i64.to_be_bytes()), Some(b"eve"), None])],
        )
        .unwrap();
        let row = &rows[0];

        assert_eq!(row.get(0), Some(&Value::Int8(5)));
        assert_eq!(row.get_by_name("name"), Some(&Value::Text("eve".into())));
        assert_eq!(row.get(2), None);
        assert_eq!(row.try_get::<i32>(0).unwrap(), 5);
        assert_eq!(row.try_get::<Option<i32>>(2).unwrap(), None);
        assert!(row.try_get::<i32>(2).is_err());
        assert!(row.try_get::<i32>(9).is_err());
    }

    #[test]
    fn test_range_checked_conversion() {
        let registry = TypeRegistry::default();
        let cols: Arc<[ColumnInfo]> = vec![col("big", oid::INT8, FormatCode::Text)].into();
        let rows = decode_rows(&registry, &[raw(cols, &[Some(b"9999999999")])]).unwrap();
        let err = rows[0].try_get::<i32>(0).unwrap_err();
        assert!(matches!(err, Error::Conversion(_)));
        assert!(err.to_string().contains("big"));
        assert_eq!(rows[0].try_get::<i64>(0).unwrap(), 9_999_999_999);
    }

    #[test]
    fn test_unknown_oid_reported() {
        let registry = TypeRegistry::default();
        let cols: Arc<[ColumnInfo]> = vec![
            col("a", 90_001, FormatCode::Text),
            col("b", oid::INT4, FormatCode::Text),
        ]
        .into();
        let rows = [raw(Arc::clone(&cols), &[Some(b"x"), Some(b"1")])];
        assert!(matches!(
            decode_rows(&registry, &rows),
            Err(Error::UnsupportedType(90_001))
        ));
        assert_eq!(unknown_column_types(&registry, &rows), vec![90_001]);
    }
}
