//! COPY FROM STDIN / COPY TO STDOUT state machines.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::protocol::backend::{
    CommandComplete, CopyData, CopyInResponse, CopyOutResponse, ErrorResponse, RawMessage,
    ReadyForQuery, msg_type,
};
use crate::protocol::frontend::{write_copy_done, write_copy_fail, write_query};
use crate::protocol::types::TransactionStatus;

use super::action::Action;
use super::{StateMachine, async_action, defer, unexpected};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Query sent; waiting for CopyInResponse.
    Start,
    /// CopyDone sent.
    Finish,
    /// CopyFail sent; the resulting server error is expected.
    Fail,
}

/// One phase of a COPY FROM STDIN.
///
/// [`start`](Self::start) stops as soon as the server is ready for data,
/// leaving the connection in copy mode; the caller streams CopyData and then
/// runs [`finish`](Self::finish) or [`fail`](Self::fail).
pub struct CopyInStateMachine {
    phase: Phase,
    started: bool,
    column_count: usize,
    rows: u64,
    error: Option<Error>,
    ready_status: Option<TransactionStatus>,
}

impl CopyInStateMachine {
    fn with(phase: Phase) -> Self {
        Self {
            phase,
            started: false,
            column_count: 0,
            rows: 0,
            error: None,
            ready_status: None,
        }
    }

    pub fn start(buffer_set: &mut BufferSet, sql: &str) -> Self {
        buffer_set.write_buffer.clear();
        write_query(&mut buffer_set.write_buffer, sql);
        Self::with(Phase::Start)
    }

    pub fn finish(buffer_set: &mut BufferSet) -> Self {
        buffer_set.write_buffer.clear();
        write_copy_done(&mut buffer_set.write_buffer);
        Self::with(Phase::Finish)
    }

    pub fn fail(buffer_set: &mut BufferSet, reason: &str) -> Self {
        buffer_set.write_buffer.clear();
        write_copy_fail(&mut buffer_set.write_buffer, reason);
        Self::with(Phase::Fail)
    }

    /// Rows reported by the final CommandComplete.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Columns announced by CopyInResponse.
    pub fn column_count(&self) -> usize {
        self.column_count
    }
}

impl StateMachine for CopyInStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if !self.started {
            self.started = true;
            return Ok(Action::WriteAndReadMessage);
        }
        let type_byte = buffer_set.type_byte;
        if RawMessage::is_async_type(type_byte) {
            return async_action(buffer_set);
        }
        let payload = &buffer_set.read_buffer;
        match (self.phase, type_byte) {
            (Phase::Start, msg_type::COPY_IN_RESPONSE) => {
                let response = CopyInResponse::parse(payload)?;
                self.column_count = response.0.column_formats.len();
                tracing::debug!(columns = self.column_count, "server ready for COPY data");
                return Ok(Action::Finished);
            }
            (Phase::Start, msg_type::COPY_OUT_RESPONSE) => defer(
                &mut self.error,
                Err(Error::InvalidUsage(
                    "statement is COPY TO STDOUT; use copy_out".into(),
                )),
            ),
            (Phase::Start, msg_type::ROW_DESCRIPTION | msg_type::DATA_ROW) => defer(
                &mut self.error,
                Err(Error::InvalidUsage("statement is not COPY FROM STDIN".into())),
            ),
            (_, msg_type::COPY_DATA | msg_type::COPY_DONE | msg_type::EMPTY_QUERY_RESPONSE) => {}
            (_, msg_type::COMMAND_COMPLETE) => {
                self.rows = CommandComplete::parse(payload)?.rows_affected().unwrap_or(0);
            }
            (_, msg_type::ERROR_RESPONSE) => {
                let error = ErrorResponse::parse(payload)?.into_error();
                if self.phase == Phase::Fail {
                    tracing::debug!(%error, "COPY aborted");
                } else {
                    defer(&mut self.error, Err(error));
                }
            }
            (_, msg_type::READY_FOR_QUERY) => {
                let ready = ReadyForQuery::parse(payload)?;
                self.ready_status = Some(ready.transaction_status().unwrap_or_default());
                if let Some(e) = self.error.take() {
                    return Err(e);
                }
                if self.phase == Phase::Start {
                    return Err(Error::InvalidUsage("statement is not COPY FROM STDIN".into()));
                }
                return Ok(Action::Finished);
            }
            (_, other) => return Err(unexpected(other, "in COPY FROM STDIN")),
        }
        Ok(Action::ReadMessage)
    }

    fn ready_status(&self) -> Option<TransactionStatus> {
        self.ready_status
    }
}

/// Runs a COPY TO STDOUT, handing each CopyData payload to `sink`.
///
/// A sink error stops delivery but the response is still read to the end,
/// so the connection remains usable.
pub struct CopyOutStateMachine<F> {
    started: bool,
    sink: F,
    in_copy: bool,
    rows: u64,
    error: Option<Error>,
    ready_status: Option<TransactionStatus>,
}

impl<F: FnMut(&[u8]) -> Result<()>> CopyOutStateMachine<F> {
    pub fn new(buffer_set: &mut BufferSet, sql: &str, sink: F) -> Self {
        buffer_set.write_buffer.clear();
        write_query(&mut buffer_set.write_buffer, sql);
        Self {
            started: false,
            sink,
            in_copy: false,
            rows: 0,
            error: None,
            ready_status: None,
        }
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }
}

impl<F: FnMut(&[u8]) -> Result<()>> StateMachine for CopyOutStateMachine<F> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if !self.started {
            self.started = true;
            return Ok(Action::WriteAndReadMessage);
        }
        let type_byte = buffer_set.type_byte;
        if RawMessage::is_async_type(type_byte) {
            return async_action(buffer_set);
        }
        let payload = &buffer_set.read_buffer;
        match type_byte {
            msg_type::COPY_OUT_RESPONSE => {
                CopyOutResponse::parse(payload)?;
                self.in_copy = true;
            }
            msg_type::COPY_DATA => {
                let data = CopyData::parse(payload)?;
                if self.error.is_none() {
                    defer(&mut self.error, (self.sink)(data.data));
                }
            }
            msg_type::COPY_DONE | msg_type::EMPTY_QUERY_RESPONSE => {}
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(payload)?;
                if self.in_copy {
                    self.rows = complete.rows_affected().unwrap_or(0);
                    self.in_copy = false;
                }
            }
            msg_type::ROW_DESCRIPTION | msg_type::DATA_ROW => defer(
                &mut self.error,
                Err(Error::InvalidUsage("statement is not COPY TO STDOUT".into())),
            ),
            msg_type::COPY_IN_RESPONSE => {
                defer(
                    &mut self.error,
                    Err(Error::InvalidUsage(
                        "statement is COPY FROM STDIN; use copy_in".into(),
                    )),
                );
                buffer_set.write_buffer.clear();
                write_copy_fail(&mut buffer_set.write_buffer, "COPY FROM STDIN requires copy_in");
                return Ok(Action::WriteAndReadMessage);
            }
            msg_type::ERROR_RESPONSE => {
                let error = ErrorResponse::parse(payload)?.into_error();
                defer(&mut self.error, Err(error));
            }
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(payload)?;
                self.ready_status = Some(ready.transaction_status().unwrap_or_default());
                return match self.error.take() {
                    Some(e) => Err(e),
                    None => Ok(Action::Finished),
                };
            }
            other => return Err(unexpected(other, "in COPY TO STDOUT")),
        }
        Ok(Action::ReadMessage)
    }

    fn ready_status(&self) -> Option<TransactionStatus> {
        self.ready_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::*;

    fn copy_data(bytes: &[u8]) -> (u8, Vec<u8>) {
        (msg_type::COPY_DATA, bytes.to_vec())
    }

    #[test]
    fn test_copy_in_phases() {
        let mut bs = BufferSet::new();
        let mut sm = CopyInStateMachine::start(&mut bs, "COPY t FROM STDIN");
        sm.step(&mut bs).unwrap();
        let actions = run(&mut sm, &mut bs, &[copy_response(msg_type::COPY_IN_RESPONSE, 2)]);
        assert!(matches!(actions[0], Ok(Action::Finished)));
        assert_eq!(sm.column_count(), 2);
        assert_eq!(sm.ready_status(), None);

        let mut sm = CopyInStateMachine::finish(&mut bs);
        assert_eq!(frontend_tags(&bs.write_buffer), vec![b'c']);
        sm.step(&mut bs).unwrap();
        run(&mut sm, &mut bs, &[command_complete("COPY 2"), ready(b'I')]);
        assert_eq!(sm.rows(), 2);
        assert_eq!(sm.ready_status(), Some(TransactionStatus::Idle));
    }

    #[test]
    fn test_copy_in_fail_swallows_error() {
        let mut bs = BufferSet::new();
        let mut sm = CopyInStateMachine::fail(&mut bs, "client gave up");
        assert_eq!(frontend_tags(&bs.write_buffer), vec![b'f']);
        sm.step(&mut bs).unwrap();
        let actions = run(&mut sm, &mut bs, &[error("57014", "COPY from stdin failed"), ready(b'I')]);
        assert!(matches!(actions[1], Ok(Action::Finished)));
    }

    #[test]
    fn test_copy_in_on_select() {
        let mut bs = BufferSet::new();
        let mut sm = CopyInStateMachine::start(&mut bs, "SELECT 1");
        sm.step(&mut bs).unwrap();
        let actions = run(
            &mut sm,
            &mut bs,
            &[
                row_description(&[("x", 23, 0)]),
                data_row(&[Some(b"1")]),
                command_complete("SELECT 1"),
                ready(b'I'),
            ],
        );
        assert!(matches!(actions[3], Err(Error::InvalidUsage(_))));
    }

    #[test]
    fn test_copy_out_streams() {
        let mut bs = BufferSet::new();
        let mut chunks: Vec<Vec<u8>> = Vec::new();
        let mut sink = |data: &[u8]| {
            chunks.push(data.to_vec());
            Ok(())
        };
        let mut sm = CopyOutStateMachine::new(&mut bs, "COPY t TO STDOUT", &mut sink);
        sm.step(&mut bs).unwrap();
        let actions = run(
            &mut sm,
            &mut bs,
            &[
                copy_response(msg_type::COPY_OUT_RESPONSE, 1),
                copy_data(b"1\n"),
                copy_data(b"2\n"),
                empty(msg_type::COPY_DONE),
                command_complete("COPY 2"),
                ready(b'I'),
            ],
        );
        assert!(matches!(actions.last(), Some(Ok(Action::Finished))));
        assert_eq!(sm.rows(), 2);
        drop(sm);
        assert_eq!(chunks, vec![b"1\n".to_vec(), b"2\n".to_vec()]);
    }

    #[test]
    fn test_copy_out_sink_error_drains() {
        let mut bs = BufferSet::new();
        let mut sink = |_: &[u8]| Err(Error::Io(std::io::Error::other("disk full")));
        let mut sm = CopyOutStateMachine::new(&mut bs, "COPY t TO STDOUT", &mut sink);
        sm.step(&mut bs).unwrap();
        let actions = run(
            &mut sm,
            &mut bs,
            &[
                copy_response(msg_type::COPY_OUT_RESPONSE, 1),
                copy_data(b"1\n"),
                copy_data(b"2\n"),
                empty(msg_type::COPY_DONE),
                command_complete("COPY 2"),
                ready(b'I'),
            ],
        );
        assert!(actions[..5].iter().all(|a| matches!(a, Ok(Action::ReadMessage))));
        assert!(matches!(actions[5], Err(Error::Io(_))));
        assert_eq!(sm.ready_status(), Some(TransactionStatus::Idle));
    }
}
