//! Transaction support for synchronous PostgreSQL connections.

use super::Conn;
use crate::error::{Error, Result};
use crate::sql::quote_identifier;

/// A transaction opened by [`Conn::run_transaction`].
///
/// The connection is passed to `commit` and `rollback`, which check that it
/// is the one the transaction was started on.
pub struct Transaction {
    connection_id: u32,
}

impl Transaction {
    pub(crate) fn new(connection_id: u32) -> Self {
        Self { connection_id }
    }

    pub fn commit(self, conn: &mut Conn) -> Result<()> {
        check_connection(self.connection_id, conn)?;
        conn.commit()
    }

    pub fn rollback(self, conn: &mut Conn) -> Result<()> {
        check_connection(self.connection_id, conn)?;
        conn.rollback()
    }
}

/// A named point inside a transaction that can be rolled back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    name: String,
    connection_id: u32,
}

impl Savepoint {
    pub fn name(&self) -> &str {
        &self.name
    }
}

fn check_connection(expected: u32, conn: &Conn) -> Result<()> {
    let actual = conn.connection_id();
    if expected != actual {
        return Err(Error::InvalidUsage(format!(
            "connection mismatch: expected {}, got {}",
            expected, actual
        )));
    }
    Ok(())
}

impl Conn {
    /// Run `f` inside a transaction.
    ///
    /// The transaction is committed when `f` returns `Ok` without finishing
    /// it, and rolled back when `f` fails.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUsage` if called while already in a transaction.
    pub fn run_transaction<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Conn, Transaction) -> Result<R>,
    {
        if self.in_transaction() {
            return Err(Error::InvalidUsage("nested transactions are not supported".into()));
        }
        self.begin()?;
        let tx = Transaction::new(self.connection_id());
        let result = f(self, tx);
        if self.in_transaction() && !self.is_broken() {
            match &result {
                Ok(_) => self.commit()?,
                Err(_) => {
                    if let Err(e) = self.rollback() {
                        tracing::warn!(error = %e, "rollback after failed transaction body failed");
                    }
                }
            }
        }
        result
    }

    /// Set a savepoint in the open transaction.
    ///
    /// With autocommit off a transaction is opened first.
    pub fn savepoint(&mut self, name: &str) -> Result<Savepoint> {
        self.check_open()?;
        self.begin_if_needed()?;
        if !self.in_transaction() {
            return Err(Error::InvalidUsage("savepoints need an open transaction".into()));
        }
        self.run_control(&format!("SAVEPOINT {}", quote_identifier(name)))?;
        Ok(Savepoint {
            name: name.to_owned(),
            connection_id: self.connection_id(),
        })
    }

    /// Undo everything after `savepoint`; the savepoint stays usable.
    pub fn rollback_to_savepoint(&mut self, savepoint: &Savepoint) -> Result<()> {
        check_connection(savepoint.connection_id, self)?;
        self.run_control(&format!(
            "ROLLBACK TO SAVEPOINT {}",
            quote_identifier(&savepoint.name)
        ))
    }

    pub fn release_savepoint(&mut self, savepoint: &Savepoint) -> Result<()> {
        check_connection(savepoint.connection_id, self)?;
        self.run_control(&format!(
            "RELEASE SAVEPOINT {}",
            quote_identifier(&savepoint.name)
        ))
    }
}
