//! Synchronous PostgreSQL client.

mod conn;
mod copy;
mod cursor;
mod stream;
mod transaction;

pub use conn::Conn;
pub use copy::CopyIn;
pub use cursor::Cursor;
pub use stream::Stream;
pub use transaction::{Savepoint, Transaction};
