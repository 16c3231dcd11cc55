//! Simple query protocol state machine.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::handler::RowHandler;
use crate::protocol::backend::{
    CommandComplete, DataRow, ErrorResponse, RawMessage, ReadyForQuery, RowDescription, msg_type,
};
use crate::protocol::frontend::{write_copy_fail, write_query};
use crate::protocol::types::TransactionStatus;
use crate::statement::ColumnInfo;

use super::action::Action;
use super::{StateMachine, async_action, defer, unexpected};

/// Runs one Query message, which may hold several statements.
///
/// Every statement's results go to the handler; all columns arrive as text.
/// A COPY FROM STDIN statement is refused with CopyFail and COPY TO STDOUT
/// data is discarded, since neither has anywhere to go here.
pub struct SimpleQueryStateMachine<'a, H> {
    started: bool,
    handler: &'a mut H,
    columns: Vec<ColumnInfo>,
    error: Option<Error>,
    ready_status: Option<TransactionStatus>,
}

impl<'a, H: RowHandler> SimpleQueryStateMachine<'a, H> {
    /// Queue `sql` in the write buffer.
    pub fn new(handler: &'a mut H, buffer_set: &mut BufferSet, sql: &str) -> Self {
        buffer_set.write_buffer.clear();
        write_query(&mut buffer_set.write_buffer, sql);
        Self {
            started: false,
            handler,
            columns: Vec::new(),
            error: None,
            ready_status: None,
        }
    }

    fn handle(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let payload = &buffer_set.read_buffer;
        match buffer_set.type_byte {
            msg_type::ROW_DESCRIPTION => {
                self.columns = RowDescription::parse(payload)?.to_columns();
                if self.error.is_none() {
                    defer(&mut self.error, self.handler.result_start(&self.columns));
                }
            }
            msg_type::DATA_ROW => {
                let row = DataRow::parse(payload)?;
                if self.error.is_none() {
                    defer(&mut self.error, self.handler.row(&self.columns, row));
                }
            }
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(payload)?;
                if self.error.is_none() {
                    defer(&mut self.error, self.handler.result_end(complete));
                }
                self.columns.clear();
            }
            msg_type::EMPTY_QUERY_RESPONSE => {}
            msg_type::ERROR_RESPONSE => {
                let error = ErrorResponse::parse(payload)?.into_error();
                defer(&mut self.error, Err(error));
            }
            msg_type::COPY_IN_RESPONSE => {
                tracing::debug!("refusing COPY FROM STDIN in a simple query");
                buffer_set.write_buffer.clear();
                write_copy_fail(
                    &mut buffer_set.write_buffer,
                    "COPY FROM STDIN is not supported by this call",
                );
                return Ok(Action::WriteAndReadMessage);
            }
            msg_type::COPY_OUT_RESPONSE | msg_type::COPY_DATA | msg_type::COPY_DONE => {}
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(payload)?;
                self.ready_status = Some(ready.transaction_status().unwrap_or_default());
                return match self.error.take() {
                    Some(e) => Err(e),
                    None => Ok(Action::Finished),
                };
            }
            other => return Err(unexpected(other, "in simple query response")),
        }
        Ok(Action::ReadMessage)
    }
}

impl<H: RowHandler> StateMachine for SimpleQueryStateMachine<'_, H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if !self.started {
            self.started = true;
            return Ok(Action::WriteAndReadMessage);
        }
        if RawMessage::is_async_type(buffer_set.type_byte) {
            return async_action(buffer_set);
        }
        self.handle(buffer_set)
    }

    fn ready_status(&self) -> Option<TransactionStatus> {
        self.ready_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::RowsHandler;
    use crate::protocol::types::oid;
    use crate::state::testing::*;

    #[test]
    fn test_multi_statement() {
        let mut bs = BufferSet::new();
        let mut handler = RowsHandler::new();
        let mut sm = SimpleQueryStateMachine::new(&mut handler, &mut bs, "SELECT 1; UPDATE t SET x = 1");
        assert_eq!(frontend_tags(&bs.write_buffer), vec![b'Q']);
        assert!(matches!(sm.step(&mut bs).unwrap(), Action::WriteAndReadMessage));

        let actions = run(
            &mut sm,
            &mut bs,
            &[
                row_description(&[("?column?", oid::INT4, 0)]),
                data_row(&[Some(b"1")]),
                command_complete("SELECT 1"),
                command_complete("UPDATE 3"),
                ready(b'T'),
            ],
        );
        assert!(matches!(actions.last(), Some(Ok(Action::Finished))));
        assert_eq!(sm.ready_status(), Some(TransactionStatus::InTransaction));
        assert_eq!(handler.rows_affected(), Some(3));
        assert_eq!(handler.text_rows().unwrap(), vec![vec![Some("1".to_string())]]);
    }

    #[test]
    fn test_error_reported_at_ready() {
        let mut bs = BufferSet::new();
        let mut handler = RowsHandler::new();
        let mut sm = SimpleQueryStateMachine::new(&mut handler, &mut bs, "SELECT nope");
        sm.step(&mut bs).unwrap();
        let actions = run(&mut sm, &mut bs, &[error("42703", "column does not exist"), ready(b'I')]);
        assert!(matches!(actions[0], Ok(Action::ReadMessage)));
        assert_eq!(actions[1].as_ref().unwrap_err().sqlstate(), Some("42703"));
        assert_eq!(sm.ready_status(), Some(TransactionStatus::Idle));
    }

    #[test]
    fn test_async_messages_pass_through() {
        let mut bs = BufferSet::new();
        let mut handler = RowsHandler::new();
        let mut sm = SimpleQueryStateMachine::new(&mut handler, &mut bs, "");
        sm.step(&mut bs).unwrap();
        let actions = run(
            &mut sm,
            &mut bs,
            &[
                notice("hello"),
                empty(msg_type::EMPTY_QUERY_RESPONSE),
                ready(b'I'),
            ],
        );
        assert!(matches!(
            actions[0],
            Ok(Action::HandleAsyncMessageAndReadMessage(crate::state::AsyncMessage::Notice(_)))
        ));
        assert!(matches!(actions[2], Ok(Action::Finished)));
    }

    #[test]
    fn test_copy_in_refused() {
        let mut bs = BufferSet::new();
        let mut handler = RowsHandler::new();
        let mut sm = SimpleQueryStateMachine::new(&mut handler, &mut bs, "COPY t FROM STDIN");
        sm.step(&mut bs).unwrap();
        let (tag, payload) = copy_response(msg_type::COPY_IN_RESPONSE, 1);
        feed(&mut bs, tag, &payload);
        assert!(matches!(sm.step(&mut bs).unwrap(), Action::WriteAndReadMessage));
        assert_eq!(frontend_tags(&bs.write_buffer), vec![b'f']);

        let actions = run(&mut sm, &mut bs, &[error("57014", "COPY from stdin failed"), ready(b'I')]);
        assert!(actions[1].is_err());
    }
}
