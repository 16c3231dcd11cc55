//! Extended query protocol state machine.
//!
//! One machine covers every Parse/Bind/Execute/Close exchange the session
//! issues. Each exchange ends with Sync, so the machine simply reacts to
//! whatever arrives until ReadyForQuery.

use crate::buffer_set::BufferSet;
use crate::conversion::ToParams;
use crate::error::{Error, Result};
use crate::handler::RowHandler;
use crate::protocol::backend::{
    CommandComplete, DataRow, ErrorResponse, ParameterDescription, RawMessage, ReadyForQuery,
    RowDescription, msg_type,
};
use crate::protocol::frontend::{
    write_bind, write_close_portal, write_close_statement, write_copy_fail,
    write_describe_statement, write_execute, write_parse, write_sync,
};
use crate::protocol::types::{FormatCode, Oid, TransactionStatus};
use crate::statement::{ColumnInfo, PreparedStatement};

use super::action::Action;
use super::{StateMachine, async_action, defer, unexpected};

/// What Parse + Describe reported.
#[derive(Debug, Default)]
struct Described {
    name: String,
    sql: String,
    param_oids: Vec<Oid>,
    columns: Vec<ColumnInfo>,
}

/// Copy of `columns` with the result formats requested in Bind applied.
///
/// `formats` follows Bind rules: empty means all text, one entry applies to
/// every column, otherwise one entry per column.
pub fn apply_formats(columns: &[ColumnInfo], formats: &[FormatCode]) -> Vec<ColumnInfo> {
    columns
        .iter()
        .enumerate()
        .map(|(i, col)| {
            let format = match formats {
                [] => FormatCode::Text,
                [single] => *single,
                many => many.get(i).copied().unwrap_or(FormatCode::Text),
            };
            ColumnInfo {
                format,
                ..col.clone()
            }
        })
        .collect()
}

/// Extended query protocol state machine.
pub struct ExtendedQueryStateMachine<'a, H> {
    started: bool,
    handler: &'a mut H,
    columns: Vec<ColumnInfo>,
    /// Call `result_start` before the first row (BindComplete for execute,
    /// immediately for a cursor fetch).
    announce: Announce,
    described: Option<Described>,
    suspended: bool,
    error: Option<Error>,
    ready_status: Option<TransactionStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Announce {
    Never,
    OnBindComplete,
    OnStart,
}

impl<'a, H: RowHandler> ExtendedQueryStateMachine<'a, H> {
    fn with(handler: &'a mut H, columns: Vec<ColumnInfo>, announce: Announce) -> Self {
        Self {
            started: false,
            handler,
            columns,
            announce,
            described: None,
            suspended: false,
            error: None,
            ready_status: None,
        }
    }

    /// Parse + Describe(statement) + Sync.
    ///
    /// Parameter types are left for the server to infer.
    pub fn prepare(handler: &'a mut H, buffer_set: &mut BufferSet, name: &str, sql: &str) -> Self {
        let buf = &mut buffer_set.write_buffer;
        buf.clear();
        write_parse(buf, name, sql, &[]);
        write_describe_statement(buf, name);
        write_sync(buf);
        let mut sm = Self::with(handler, Vec::new(), Announce::Never);
        sm.described = Some(Described {
            name: name.to_owned(),
            sql: sql.to_owned(),
            ..Described::default()
        });
        sm
    }

    /// Bind the unnamed portal to `stmt`, then Execute + Sync.
    pub fn execute<P: ToParams + ?Sized>(
        handler: &'a mut H,
        buffer_set: &mut BufferSet,
        stmt: &PreparedStatement,
        params: &P,
        result_formats: &[FormatCode],
    ) -> Result<Self> {
        let buf = &mut buffer_set.write_buffer;
        buf.clear();
        write_bind(buf, "", stmt.name(), params, stmt.param_oids(), result_formats)?;
        write_execute(buf, "", 0);
        write_sync(buf);
        let columns = apply_formats(stmt.columns(), result_formats);
        Ok(Self::with(handler, columns, Announce::OnBindComplete))
    }

    /// Bind a named portal and Sync without executing it.
    ///
    /// The portal survives the Sync only inside a transaction block.
    pub fn bind_portal<P: ToParams + ?Sized>(
        handler: &'a mut H,
        buffer_set: &mut BufferSet,
        portal: &str,
        stmt: &PreparedStatement,
        params: &P,
        result_formats: &[FormatCode],
    ) -> Result<Self> {
        let buf = &mut buffer_set.write_buffer;
        buf.clear();
        write_bind(buf, portal, stmt.name(), params, stmt.param_oids(), result_formats)?;
        write_sync(buf);
        Ok(Self::with(handler, Vec::new(), Announce::Never))
    }

    /// Execute up to `max_rows` rows of an open portal.
    pub fn fetch(
        handler: &'a mut H,
        buffer_set: &mut BufferSet,
        portal: &str,
        columns: &[ColumnInfo],
        max_rows: u32,
    ) -> Self {
        let buf = &mut buffer_set.write_buffer;
        buf.clear();
        write_execute(buf, portal, max_rows);
        write_sync(buf);
        Self::with(handler, columns.to_vec(), Announce::OnStart)
    }

    pub fn close_statement(handler: &'a mut H, buffer_set: &mut BufferSet, name: &str) -> Self {
        let buf = &mut buffer_set.write_buffer;
        buf.clear();
        write_close_statement(buf, name);
        write_sync(buf);
        Self::with(handler, Vec::new(), Announce::Never)
    }

    pub fn close_portal(handler: &'a mut H, buffer_set: &mut BufferSet, name: &str) -> Self {
        let buf = &mut buffer_set.write_buffer;
        buf.clear();
        write_close_portal(buf, name);
        write_sync(buf);
        Self::with(handler, Vec::new(), Announce::Never)
    }

    /// The statement described by a [`prepare`](Self::prepare) exchange.
    pub fn take_prepared_statement(&mut self) -> Option<PreparedStatement> {
        self.described
            .take()
            .map(|d| PreparedStatement::new(d.name, d.sql, d.param_oids, d.columns))
    }

    /// True when the last Execute stopped at its row limit.
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    fn announce_columns(&mut self) {
        if self.error.is_none() {
            defer(&mut self.error, self.handler.result_start(&self.columns));
        }
    }

    fn handle(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let payload = &buffer_set.read_buffer;
        match buffer_set.type_byte {
            msg_type::PARSE_COMPLETE | msg_type::CLOSE_COMPLETE | msg_type::EMPTY_QUERY_RESPONSE => {}
            msg_type::PARAMETER_DESCRIPTION => {
                let oids = ParameterDescription::parse(payload)?.into_oids();
                if let Some(described) = self.described.as_mut() {
                    described.param_oids = oids;
                }
            }
            msg_type::ROW_DESCRIPTION => {
                let columns = RowDescription::parse(payload)?.to_columns();
                match self.described.as_mut() {
                    Some(described) => described.columns = columns,
                    None => {
                        self.columns = columns;
                        self.announce_columns();
                    }
                }
            }
            msg_type::NO_DATA => {}
            msg_type::BIND_COMPLETE => {
                if self.announce == Announce::OnBindComplete {
                    self.announce_columns();
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
            }
            msg_type::PORTAL_SUSPENDED => self.suspended = true,
            msg_type::ERROR_RESPONSE => {
                let error = ErrorResponse::parse(payload)?.into_error();
                defer(&mut self.error, Err(error));
            }
            msg_type::COPY_IN_RESPONSE => {
                buffer_set.write_buffer.clear();
                write_copy_fail(
                    &mut buffer_set.write_buffer,
                    "COPY FROM STDIN requires copy_in",
                );
                return Ok(Action::WriteAndReadMessage);
            }
            msg_type::COPY_OUT_RESPONSE | msg_type::COPY_DATA | msg_type::COPY_DONE => {}
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(payload)?;
                self.ready_status = Some(ready.transaction_status().unwrap_or_default());
                if let Some(e) = self.error.take() {
                    self.described = None;
                    return Err(e);
                }
                return Ok(Action::Finished);
            }
            other => return Err(unexpected(other, "in extended query response")),
        }
        Ok(Action::ReadMessage)
    }
}

impl<H: RowHandler> StateMachine for ExtendedQueryStateMachine<'_, H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if !self.started {
            self.started = true;
            if self.announce == Announce::OnStart {
                self.announce_columns();
            }
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
    use crate::handler::{DropHandler, RowsHandler};
    use crate::protocol::types::oid;
    use crate::state::testing::*;

    fn prepared() -> PreparedStatement {
        let mut bs = BufferSet::new();
        let mut handler = DropHandler::new();
        let mut sm = ExtendedQueryStateMachine::prepare(&mut handler, &mut bs, "s1", "SELECT $1::int4");
        sm.step(&mut bs).unwrap();
        run(
            &mut sm,
            &mut bs,
            &[
                empty(msg_type::PARSE_COMPLETE),
                parameter_description(&[oid::INT4]),
                row_description(&[("int4", oid::INT4, 0)]),
                ready(b'I'),
            ],
        );
        sm.take_prepared_statement().unwrap()
    }

    #[test]
    fn test_prepare_describes_statement() {
        let stmt = prepared();
        assert_eq!(stmt.name(), "s1");
        assert_eq!(stmt.param_oids(), &[oid::INT4]);
        assert_eq!(stmt.columns().len(), 1);
        assert!(stmt.returns_rows());
    }

    #[test]
    fn test_prepare_messages() {
        let mut bs = BufferSet::new();
        let mut handler = DropHandler::new();
        let _sm = ExtendedQueryStateMachine::prepare(&mut handler, &mut bs, "", "SELECT 1");
        assert_eq!(frontend_tags(&bs.write_buffer), vec![b'P', b'D', b'S']);
    }

    #[test]
    fn test_execute_binary_rows() {
        let stmt = prepared();
        let mut bs = BufferSet::new();
        let mut handler = RowsHandler::new();
        let mut sm =
            ExtendedQueryStateMachine::execute(&mut handler, &mut bs, &stmt, &(7_i32,), &[FormatCode::Binary])
                .unwrap();
        assert_eq!(frontend_tags(&bs.write_buffer), vec![b'B', b'E', b'S']);
        sm.step(&mut bs).unwrap();
        let actions = run(
            &mut sm,
            &mut bs,
            &[
                empty(msg_type::BIND_COMPLETE),
                data_row(&[Some(&7_i32.to_be_bytes())]),
                command_complete("SELECT 1"),
                ready(b'I'),
            ],
        );
        assert!(matches!(actions.last(), Some(Ok(Action::Finished))));
        drop(sm);
        assert_eq!(handler.rows().len(), 1);
        assert_eq!(handler.rows()[0].columns[0].format, FormatCode::Binary);
    }

    #[test]
    fn test_param_count_mismatch() {
        let stmt = prepared();
        let mut bs = BufferSet::new();
        let mut handler = DropHandler::new();
        let result = ExtendedQueryStateMachine::execute(&mut handler, &mut bs, &stmt, &(), &[]);
        assert!(matches!(result, Err(Error::InvalidUsage(_))));
    }

    #[test]
    fn test_prepare_error_drops_description() {
        let mut bs = BufferSet::new();
        let mut handler = DropHandler::new();
        let mut sm = ExtendedQueryStateMachine::prepare(&mut handler, &mut bs, "s2", "SELEC 1");
        sm.step(&mut bs).unwrap();
        let actions = run(&mut sm, &mut bs, &[error("42601", "syntax error"), ready(b'I')]);
        assert!(actions[1].is_err());
        assert!(sm.take_prepared_statement().is_none());
    }

    #[test]
    fn test_fetch_suspends() {
        let columns = apply_formats(&prepared().columns().to_vec(), &[]);
        let mut bs = BufferSet::new();
        let mut handler = RowsHandler::new();
        let mut sm = ExtendedQueryStateMachine::fetch(&mut handler, &mut bs, "c1", &columns, 1);
        sm.step(&mut bs).unwrap();
        run(
            &mut sm,
            &mut bs,
            &[data_row(&[Some(b"1")]), empty(msg_type::PORTAL_SUSPENDED), ready(b'T')],
        );
        assert!(sm.is_suspended());
        assert_eq!(sm.ready_status(), Some(TransactionStatus::InTransaction));
    }

    #[test]
    fn test_apply_formats() {
        let cols = prepared().columns().to_vec();
        let two = [cols[0].clone(), cols[0].clone()];
        let out = apply_formats(&two, &[FormatCode::Text, FormatCode::Binary]);
        assert_eq!(out[0].format, FormatCode::Text);
        assert_eq!(out[1].format, FormatCode::Binary);
        assert!(apply_formats(&two, &[FormatCode::Binary]).iter().all(|c| c.format.is_binary()));
    }
}
