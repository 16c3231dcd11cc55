//! Server-side cursors over named portals.

use super::Conn;
use crate::conversion::ToParams;
use crate::error::{Error, Result};
use crate::row::Row;
use crate::statement::ColumnInfo;

/// A bound portal that hands out its rows in pages.
///
/// Portals only outlive a Sync inside a transaction block, so a cursor is
/// valid until the transaction that opened it ends.
#[derive(Debug)]
pub struct Cursor {
    portal: String,
    columns: Vec<ColumnInfo>,
    exhausted: bool,
    connection_id: u32,
}

impl Cursor {
    pub fn name(&self) -> &str {
        &self.portal
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Fetch up to `max_rows` rows (0 for all that remain).
    ///
    /// The flag is true while the portal has more rows.
    pub fn fetch(&mut self, conn: &mut Conn, max_rows: u32) -> Result<(Vec<Row>, bool)> {
        self.check(conn)?;
        if self.exhausted {
            return Ok((Vec::new(), false));
        }
        let (rows, more) = conn.fetch_portal(&self.portal, &self.columns, max_rows)?;
        self.exhausted = !more;
        Ok((rows, more))
    }

    /// Close the portal on the server.
    pub fn close(self, conn: &mut Conn) -> Result<()> {
        self.check(conn)?;
        conn.close_portal(&self.portal)
    }

    fn check(&self, conn: &Conn) -> Result<()> {
        conn.check_open()?;
        if conn.connection_id() != self.connection_id {
            return Err(Error::InvalidUsage(
                "cursor belongs to another connection".into(),
            ));
        }
        Ok(())
    }
}

impl Conn {
    /// Bind `sql` to a named portal without running it.
    ///
    /// Needs an open transaction (or autocommit off, which opens one).
    pub fn open_cursor<P: ToParams>(&mut self, sql: &str, params: P) -> Result<Cursor> {
        self.check_open()?;
        self.begin_if_needed()?;
        if !self.in_transaction() {
            return Err(Error::InvalidUsage(
                "cursors need an open transaction".into(),
            ));
        }
        let (portal, columns) = self.bind_cursor(sql, &params)?;
        Ok(Cursor {
            portal,
            columns,
            exhausted: false,
            connection_id: self.connection_id(),
        })
    }
}
