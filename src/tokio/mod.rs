//! Asynchronous PostgreSQL client using Tokio.

mod conn;
mod copy;
mod stream;
mod transaction;

pub use conn::Conn;
pub use stream::Stream;
pub use transaction::{Savepoint, Transaction, TransactionFuture};
