//! Transaction support for asynchronous PostgreSQL connections.

use std::future::Future;
use std::pin::Pin;

use super::Conn;
use crate::error::{Error, Result};
use crate::sql::quote_identifier;

/// A transaction opened by [`Conn::run_transaction`].
pub struct Transaction {
    connection_id: u32,
}

impl Transaction {
    pub(crate) fn new(connection_id: u32) -> Self {
        Self { connection_id }
    }

    pub async fn commit(self, conn: &mut Conn) -> Result<()> {
        check_connection(self.connection_id, conn)?;
        conn.commit().await
    }

    pub async fn rollback(self, conn: &mut Conn) -> Result<()> {
        check_connection(self.connection_id, conn)?;
        conn.rollback().await
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

/// Future returned by a [`Conn::run_transaction`] body.
pub type TransactionFuture<'c, R> = Pin<Box<dyn Future<Output = Result<R>> + Send + 'c>>;

impl Conn {
    /// Run `f` inside a transaction.
    ///
    /// Committed when the body returns `Ok` with the transaction still open,
    /// rolled back when it fails.
    ///
    /// ```ignore
    /// conn.run_transaction(|conn, _tx| Box::pin(async move {
    ///     conn.exec_drop("INSERT INTO t VALUES (?)", (1,)).await?;
    ///     Ok(())
    /// })).await?;
    /// ```
    pub async fn run_transaction<F, R>(&mut self, f: F) -> Result<R>
    where
        F: for<'c> FnOnce(&'c mut Conn, Transaction) -> TransactionFuture<'c, R>,
    {
        if self.in_transaction() {
            return Err(Error::InvalidUsage("nested transactions are not supported".into()));
        }
        self.begin().await?;
        let tx = Transaction::new(self.connection_id());
        let result = f(self, tx).await;
        if self.in_transaction() && !self.is_broken() {
            match &result {
                Ok(_) => self.commit().await?,
                Err(_) => {
                    if let Err(e) = self.rollback().await {
                        tracing::warn!(error = %e, "rollback after failed transaction body failed");
                    }
                }
            }
        }
        result
    }

    pub async fn savepoint(&mut self, name: &str) -> Result<Savepoint> {
        self.check_open()?;
        self.begin_if_needed().await?;
        if !self.in_transaction() {
            return Err(Error::InvalidUsage("savepoints need an open transaction".into()));
        }
        self.run_control(&format!("SAVEPOINT {}", quote_identifier(name)))
            .await?;
        Ok(Savepoint {
            name: name.to_owned(),
            connection_id: self.connection_id(),
        })
    }

    pub async fn rollback_to_savepoint(&mut self, savepoint: &Savepoint) -> Result<()> {
        check_connection(savepoint.connection_id, self)?;
        self.run_control(&format!(
            "ROLLBACK TO SAVEPOINT {}",
            quote_identifier(&savepoint.name)
        ))
        .await
    }

    pub async fn release_savepoint(&mut self, savepoint: &Savepoint) -> Result<()> {
        check_connection(savepoint.connection_id, self)?;
        self.run_control(&format!(
            "RELEASE SAVEPOINT {}",
            quote_identifier(&savepoint.name)
        ))
        .await
    }
}
