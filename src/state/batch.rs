//! Reads the responses of pipelined batch items.
//!
//! The driver queues `Bind / Execute / Sync` once per item; each item's
//! response therefore ends with its own ReadyForQuery, and a failure only
//! aborts the item it belongs to (or, inside a transaction block, every
//! later one too, which the server reports item by item).

use crate::batch::BatchOutcome;
use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::protocol::backend::{CommandComplete, ErrorResponse, RawMessage, ReadyForQuery, msg_type};
use crate::protocol::types::TransactionStatus;

use super::action::Action;
use super::{StateMachine, async_action, defer, unexpected};

pub struct BatchStateMachine {
    expected: usize,
    started: bool,
    outcomes: Vec<Result<BatchOutcome>>,
    rows: Option<u64>,
    error: Option<Error>,
    ready_status: Option<TransactionStatus>,
}

impl BatchStateMachine {
    /// Expect `expected` Sync-delimited responses to what is already in the
    /// write buffer.
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            started: false,
            outcomes: Vec::with_capacity(expected),
            rows: None,
            error: None,
            ready_status: None,
        }
    }

    /// Per-item results, in submission order.
    pub fn take_outcomes(&mut self) -> Vec<Result<BatchOutcome>> {
        std::mem::take(&mut self.outcomes)
    }

    fn finish_item(&mut self) {
        let outcome = match self.error.take() {
            Some(e) => Err(e),
            None => Ok(match self.rows.take() {
                Some(n) => BatchOutcome::RowCount(n),
                None => BatchOutcome::SuccessNoInfo,
            }),
        };
        self.rows = None;
        self.outcomes.push(outcome);
    }
}

impl StateMachine for BatchStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if !self.started {
            self.started = true;
            if self.expected == 0 {
                return Ok(Action::Finished);
            }
            return Ok(Action::WriteAndReadMessage);
        }
        let type_byte = buffer_set.type_byte;
        if RawMessage::is_async_type(type_byte) {
            return async_action(buffer_set);
        }
        let payload = &buffer_set.read_buffer;
        match type_byte {
            msg_type::BIND_COMPLETE | msg_type::DATA_ROW | msg_type::EMPTY_QUERY_RESPONSE => {}
            msg_type::COMMAND_COMPLETE => {
                self.rows = CommandComplete::parse(payload)?.rows_affected();
            }
            msg_type::ERROR_RESPONSE => {
                let error = ErrorResponse::parse(payload)?.into_error();
                defer(&mut self.error, Err(error));
            }
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(payload)?;
                self.ready_status = Some(ready.transaction_status().unwrap_or_default());
                self.finish_item();
                if self.outcomes.len() == self.expected {
                    return Ok(Action::Finished);
                }
            }
            other => return Err(unexpected(other, "in batch response")),
        }
        Ok(Action::ReadMessage)
    }

    fn ready_status(&self) -> Option<TransactionStatus> {
        self.ready_status
    }
}
