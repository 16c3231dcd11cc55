//! Result handlers fed by the query state machines.

use std::sync::Arc;

use crate::conversion::FromRow;
use crate::error::{Error, Result};
use crate::protocol::backend::query::{CommandComplete, DataRow};
use crate::statement::ColumnInfo;

/// Receives the results of simple and extended queries.
///
/// Callback patterns by statement type:
/// - SELECT with rows: `result_start` → `row*` → `result_end`
/// - SELECT with 0 rows: `result_start` → `result_end`
/// - INSERT/UPDATE/DELETE: `result_end` only (with affected row count)
///
/// For multi-statement simple queries like `"SELECT 1; UPDATE foo SET x=1"`:
/// ```text
/// result_start → row* → result_end   // SELECT 1
/// result_end                          // UPDATE
/// ```
///
/// `cols[i].format` says how column `i` of each row is encoded. An error
/// returned from a callback is reported once the server is ready again;
/// later callbacks of the same response are skipped.
pub trait RowHandler {
    fn result_start(&mut self, cols: &[ColumnInfo]) -> Result<()> {
        let _ = cols;
        Ok(())
    }

    fn row(&mut self, cols: &[ColumnInfo], row: DataRow<'_>) -> Result<()>;

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        let _ = complete;
        Ok(())
    }
}

impl<H: RowHandler + ?Sized> RowHandler for &mut H {
    fn result_start(&mut self, cols: &[ColumnInfo]) -> Result<()> {
        (**self).result_start(cols)
    }

    fn row(&mut self, cols: &[ColumnInfo], row: DataRow<'_>) -> Result<()> {
        (**self).row(cols, row)
    }

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        (**self).result_end(complete)
    }
}

/// A handler that discards all rows.
#[derive(Debug, Default)]
pub struct DropHandler {
    rows_affected: Option<u64>,
}

impl DropHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row count of the last command, if its tag carries one.
    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }
}

impl RowHandler for DropHandler {
    fn row(&mut self, _cols: &[ColumnInfo], _row: DataRow<'_>) -> Result<()> {
        Ok(())
    }

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        self.rows_affected = complete.rows_affected();
        Ok(())
    }
}

/// Handler that collects typed rows.
///
/// # Example
///
/// ```ignore
/// let mut handler: CollectHandler<(i32, String)> = CollectHandler::new();
/// conn.query("SELECT id, name FROM users", &mut handler)?;
/// for (id, name) in handler.into_rows() {
///     println!("{}: {}", id, name);
/// }
/// ```
#[derive(Debug)]
pub struct CollectHandler<T> {
    rows: Vec<T>,
}

impl<T> Default for CollectHandler<T> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<T> CollectHandler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[T] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<T> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl<T: for<'a> FromRow<'a>> RowHandler for CollectHandler<T> {
    fn row(&mut self, cols: &[ColumnInfo], row: DataRow<'_>) -> Result<()> {
        self.rows.push(T::from_row(cols, row)?);
        Ok(())
    }
}

/// Handler that keeps only the first row.
#[derive(Debug)]
pub struct FirstRowHandler<T> {
    row: Option<T>,
}

impl<T> Default for FirstRowHandler<T> {
    fn default() -> Self {
        Self { row: None }
    }
}

impl<T> FirstRowHandler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&T> {
        self.row.as_ref()
    }

    pub fn into_row(self) -> Option<T> {
        self.row
    }
}

impl<T: for<'a> FromRow<'a>> RowHandler for FirstRowHandler<T> {
    fn row(&mut self, cols: &[ColumnInfo], row: DataRow<'_>) -> Result<()> {
        if self.row.is_none() {
            self.row = Some(T::from_row(cols, row)?);
        }
        Ok(())
    }
}

/// One undecoded row together with the description it arrived under.
#[derive(Debug, Clone)]
pub struct RawRow {
    pub columns: Arc<[ColumnInfo]>,
    pub payload: Vec<u8>,
}

impl RawRow {
    pub fn data(&self) -> Result<DataRow<'_>> {
        DataRow::parse(&self.payload)
    }
}

/// Keeps rows as received so they can be decoded later, possibly twice.
///
/// Decoding through the type registry can fail on an OID the registry has
/// not loaded yet. Holding the raw payloads lets the session refresh the
/// catalog and decode again without re-running the statement.
#[derive(Debug, Default)]
pub struct RowsHandler {
    current: Option<Arc<[ColumnInfo]>>,
    rows: Vec<RawRow>,
    rows_affected: Option<u64>,
}

impl RowsHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }

    /// Rows as text, for simple-query results where every column is text.
    pub fn text_rows(&self) -> Result<Vec<Vec<Option<String>>>> {
        self.rows
            .iter()
            .map(|raw| {
                raw.data()?
                    .iter()
                    .map(|value| {
                        value
                            .map(|bytes| {
                                simdutf8::compat::from_utf8(bytes)
                                    .map(str::to_owned)
                                    .map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))
                            })
                            .transpose()
                    })
                    .collect()
            })
            .collect()
    }
}

impl RowHandler for RowsHandler {
    fn result_start(&mut self, cols: &[ColumnInfo]) -> Result<()> {
        self.current = Some(cols.into());
        Ok(())
    }

    fn row(&mut self, cols: &[ColumnInfo], row: DataRow<'_>) -> Result<()> {
        let columns = match &self.current {
            Some(current) if current.len() == cols.len() => Arc::clone(current),
            _ => {
                let fresh: Arc<[ColumnInfo]> = cols.into();
                self.current = Some(Arc::clone(&fresh));
                fresh
            }
        };
        self.rows.push(RawRow {
            columns,
            payload: row.to_payload(),
        });
        Ok(())
    }

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        self.rows_affected = complete.rows_affected();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::{FormatCode, oid};

    fn text_column(name: &str) -> ColumnInfo {
        ColumnInfo {
            name: name.into(),
            table_oid: 0,
            column_id: 0,
            type_oid: oid::TEXT,
            type_size: -1,
            type_modifier: -1,
            format: FormatCode::Text,
        }
    }

    fn payload(values: &[Option<&str>]) -> Vec<u8> {
        let mut out = (values.len() as u16).to_be_bytes().to_vec();
        for v in values {
            match v {
                Some(s) => {
                    out.extend_from_slice(&(s.len() as i32).to_be_bytes());
                    out.extend_from_slice(s.as_bytes());
                }
                None => out.extend_from_slice(&(-1_i32).to_be_bytes()),
            }
        }
        out
    }

    #[test]
    fn test_drop_handler_counts() {
        let mut h = DropHandler::new();
        h.result_end(CommandComplete { tag: "UPDATE 4" }).unwrap();
        assert_eq!(h.rows_affected(), Some(4));
    }

    #[test]
    fn test_first_row_handler_keeps_first() {
        let cols = [text_column("a")];
        let mut h = FirstRowHandler::<(String,)>::new();
        for v in ["x", "y"] {
            let p = payload(&[Some(v)]);
            h.row(&cols, DataRow::parse(&p).unwrap()).unwrap();
        }
        assert_eq!(h.into_row(), Some(("x".to_string(),)));
    }

    #[test]
    fn test_rows_handler_text_rows() {
        let cols = [text_column("a"), text_column("b")];
        let mut h = RowsHandler::new();
        h.result_start(&cols).unwrap();
        let p = payload(&[Some("1"), None]);
        h.row(&cols, DataRow::parse(&p).unwrap()).unwrap();
        h.result_end(CommandComplete { tag: "SELECT 1" }).unwrap();

        assert_eq!(h.rows_affected(), Some(1));
        assert_eq!(h.rows()[0].columns.len(), 2);
        assert_eq!(h.text_rows().unwrap(), vec![vec![Some("1".to_string()), None]]);
    }
}
