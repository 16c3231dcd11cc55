//! Sans-I/O state machines for the PostgreSQL protocol.
//!
//! These state machines handle the protocol logic without performing any I/O.
//! Constructors queue the request in `buffer_set.write_buffer`; `step` then
//! returns [`Action`] values that tell the driver what to do next. After
//! each read the driver leaves the message type in `buffer_set.type_byte`
//! and the payload in `buffer_set.read_buffer`.

pub mod action;
pub mod batch;
pub mod catalog;
pub mod connection;
pub mod copy;
pub mod extended;
pub mod simple_query;

#[cfg(test)]
pub(crate) mod testing;

pub use action::{Action, AsyncMessage};
pub use batch::BatchStateMachine;
pub use catalog::CatalogRefresh;
pub use connection::ConnectionStateMachine;
pub use copy::{CopyInStateMachine, CopyOutStateMachine};
pub use extended::ExtendedQueryStateMachine;
pub use simple_query::SimpleQueryStateMachine;

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::protocol::backend::RawMessage;
use crate::protocol::types::TransactionStatus;

/// One request/response exchange with the server.
pub trait StateMachine {
    /// Advance on the message in `buffer_set`, or start the exchange on the
    /// first call.
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action>;

    /// Status reported by the ReadyForQuery that ended the exchange.
    ///
    /// `None` when the machine stopped before one arrived, which leaves
    /// the connection mid-protocol.
    fn ready_status(&self) -> Option<TransactionStatus>;
}

/// Turn a NoticeResponse, NotificationResponse or ParameterStatus into the
/// action that hands it to the driver.
pub(crate) fn async_action(buffer_set: &BufferSet) -> Result<Action> {
    let msg = RawMessage::new(buffer_set.type_byte, &buffer_set.read_buffer);
    Ok(Action::HandleAsyncMessageAndReadMessage(msg.parse_async()?))
}

/// Keep the first error of a response; the rest of the response is still
/// read so the connection stays in sync.
pub(crate) fn defer(slot: &mut Option<Error>, result: Result<()>) {
    if let Err(e) = result
        && slot.is_none()
    {
        *slot = Some(e);
    }
}

pub(crate) fn unexpected(type_byte: u8, context: &str) -> Error {
    Error::Protocol(format!(
        "unexpected message '{}' {}",
        type_byte as char, context
    ))
}
