//! Prepared statements and the statement reference accepted by `exec_*`.

use std::sync::Arc;

use crate::protocol::types::{FormatCode, Oid};

/// Owned description of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Table OID (0 if not a table column)
    pub table_oid: Oid,
    /// Column attribute number (0 if not a table column)
    pub column_id: i16,
    pub type_oid: Oid,
    /// -1 for variable length, -2 for null-terminated
    pub type_size: i16,
    pub type_modifier: i32,
    /// Format the values of this column arrive in
    pub format: FormatCode,
}

/// A statement parsed on the server.
///
/// Parameter types are the ones the server inferred (or was told) at Parse
/// time; Bind encodes every value for them.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    name: String,
    sql: String,
    param_oids: Vec<Oid>,
    columns: Vec<ColumnInfo>,
}

impl PreparedStatement {
    pub(crate) fn new(name: String, sql: String, param_oids: Vec<Oid>, columns: Vec<ColumnInfo>) -> Self {
        Self {
            name,
            sql,
            param_oids,
            columns,
        }
    }

    /// Server-side name; empty for the unnamed statement.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The SQL text as sent in Parse, after placeholder rewriting.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn param_oids(&self) -> &[Oid] {
        &self.param_oids
    }

    /// Result columns as described by the server, in text format.
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// True when Describe reported result columns.
    ///
    /// Batches refuse to execute such statements.
    pub fn returns_rows(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn is_unnamed(&self) -> bool {
        self.name.is_empty()
    }
}

/// Statement references accepted by the `exec_*` methods.
///
/// Raw SQL goes through placeholder rewriting and the statement cache;
/// a [`PreparedStatement`] is bound directly.
pub trait IntoStatement: private::Sealed {
    fn as_sql(&self) -> Option<&str>;

    fn as_prepared(&self) -> Option<&PreparedStatement>;
}

mod private {
    use std::sync::Arc;

    use super::PreparedStatement;

    pub trait Sealed {}

    impl Sealed for &PreparedStatement {}
    impl Sealed for &Arc<PreparedStatement> {}
    impl Sealed for &str {}
    impl Sealed for &String {}
}

impl IntoStatement for &PreparedStatement {
    fn as_sql(&self) -> Option<&str> {
        None
    }

    fn as_prepared(&self) -> Option<&PreparedStatement> {
        Some(self)
    }
}

impl IntoStatement for &Arc<PreparedStatement> {
    fn as_sql(&self) -> Option<&str> {
        None
    }

    fn as_prepared(&self) -> Option<&PreparedStatement> {
        Some(self)
    }
}

impl IntoStatement for &str {
    fn as_sql(&self) -> Option<&str> {
        Some(self)
    }

    fn as_prepared(&self) -> Option<&PreparedStatement> {
        None
    }
}

impl IntoStatement for &String {
    fn as_sql(&self) -> Option<&str> {
        Some(self.as_str())
    }

    fn as_prepared(&self) -> Option<&PreparedStatement> {
        None
    }
}
