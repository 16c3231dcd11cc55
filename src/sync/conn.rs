//! Synchronous PostgreSQL connection.

use std::sync::Arc;

use crate::batch::{
    Batch, BatchError, BatchOutcome, BatchTarget, NonStrictRun, check_executable, needs_parse,
    write_item,
};
use crate::buffer_set::BufferSet;
use crate::cache::StatementCache;
use crate::cancel::CancelToken;
use crate::conversion::{FromRow, ToParams};
use crate::error::{Error, Result};
use crate::handler::{CollectHandler, DropHandler, FirstRowHandler, RawRow, RowHandler, RowsHandler};
use crate::notify::{ListenerId, Listeners, NoticeHandler, Notification};
use crate::opts::Opts;
use crate::protocol::backend::BackendKeyData;
use crate::protocol::frontend::write_terminate;
use crate::protocol::types::{Oid, TransactionStatus};
use crate::row::{self, Row};
use crate::session::{
    Executes, NotificationSource, SessionState, TransactionControl, find_param,
    parse_server_version, record_parameter, result_formats, session_registry,
};
use crate::sql;
use crate::state::{
    Action, AsyncMessage, BatchStateMachine, CatalogRefresh, ConnectionStateMachine,
    ExtendedQueryStateMachine, SimpleQueryStateMachine, StateMachine,
};
use crate::statement::{IntoStatement, PreparedStatement};
use crate::types::TypeRegistry;

use super::stream::Stream;

/// Synchronous PostgreSQL connection.
pub struct Conn {
    pub(super) stream: Stream,
    pub(super) buffer_set: BufferSet,
    opts: Opts,
    backend_key: Option<BackendKeyData>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    auto_commit: bool,
    is_broken: bool,
    registry: Arc<TypeRegistry>,
    cache: StatementCache,
    listeners: Listeners,
    portal_counter: u64,
}

impl Conn {
    /// Connect to a PostgreSQL server.
    pub fn new<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let mut opts = opts.try_into()?;
        opts.resolve_ssl_mode(cfg!(feature = "sync-tls"))?;
        let stream = Stream::connect(&opts)?;
        Self::new_with_stream(stream, opts)
    }

    /// Run startup and authentication over an existing stream.
    pub fn new_with_stream(stream: Stream, opts: Opts) -> Result<Self> {
        stream.set_read_timeout(opts.read_timeout)?;
        let mut buffer_set = BufferSet::new();
        let mut state_machine = ConnectionStateMachine::new(&opts);
        let stream = startup(stream, &mut buffer_set, &mut state_machine, &opts)?;

        let server_params = state_machine.take_server_params();
        let registry = session_registry(&opts, &server_params);
        let backend_key = state_machine.backend_key();
        tracing::debug!(
            pid = backend_key.map(|k| k.process_id()),
            server_version = find_param(&server_params, "server_version"),
            "connection established"
        );

        Ok(Self {
            stream,
            buffer_set,
            cache: StatementCache::new(opts.statement_cache_size),
            opts,
            backend_key,
            server_params,
            transaction_status: state_machine.ready_status().unwrap_or_default(),
            auto_commit: true,
            is_broken: false,
            registry,
            listeners: Listeners::new(),
            portal_counter: 0,
        })
    }

    /// Get the backend key data for query cancellation.
    pub fn backend_key(&self) -> Option<&BackendKeyData> {
        self.backend_key.as_ref()
    }

    /// Get the connection ID (backend process ID).
    ///
    /// Returns 0 if the backend key data is not available.
    pub fn connection_id(&self) -> u32 {
        self.backend_key.as_ref().map_or(0, |k| k.process_id())
    }

    /// Get server parameters.
    pub fn server_params(&self) -> &[(String, String)] {
        &self.server_params
    }

    pub fn server_param(&self, name: &str) -> Option<&str> {
        find_param(&self.server_params, name)
    }

    /// `(major, minor)` of the server.
    pub fn server_version(&self) -> Option<(u32, u32)> {
        self.server_param("server_version").and_then(parse_server_version)
    }

    /// Get the current transaction status.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Check if currently in a transaction.
    pub fn in_transaction(&self) -> bool {
        self.transaction_status.in_transaction()
    }

    /// Check if the connection is broken.
    pub fn is_broken(&self) -> bool {
        self.is_broken
    }

    pub fn state(&self) -> SessionState {
        if self.is_broken {
            SessionState::Closed
        } else {
            SessionState::Ready(self.transaction_status)
        }
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    /// The type registry decoding this session's rows.
    pub fn type_registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Number of statements in the statement cache.
    pub fn cached_statements(&self) -> usize {
        self.cache.len()
    }

    /// Token for cancelling the running statement from another thread.
    pub fn cancel_token(&self) -> Result<CancelToken> {
        let key = self
            .backend_key
            .ok_or_else(|| Error::Unsupported("server sent no cancellation key".into()))?;
        Ok(CancelToken::new(&self.opts, key.process_id(), key.secret()))
    }

    pub(super) fn check_open(&self) -> Result<()> {
        if self.is_broken {
            Err(Error::ConnectionBroken)
        } else {
            Ok(())
        }
    }

    pub(super) fn send_buffer(&mut self) -> Result<()> {
        let result = self
            .stream
            .write_all(&self.buffer_set.write_buffer)
            .and_then(|()| self.stream.flush());
        if let Err(e) = result {
            self.is_broken = true;
            return Err(e.into());
        }
        Ok(())
    }

    /// Drive a state machine to completion.
    ///
    /// Stopping before ReadyForQuery leaves the protocol out of step, so
    /// such a failure breaks the connection.
    pub(super) fn drive<S: StateMachine>(&mut self, state_machine: &mut S) -> Result<()> {
        let result = self.drive_inner(state_machine);
        if let Some(status) = state_machine.ready_status() {
            self.transaction_status = status;
        }
        if let Err(e) = &result
            && (e.is_connection_broken() || state_machine.ready_status().is_none())
        {
            self.is_broken = true;
        }
        result
    }

    fn drive_inner<S: StateMachine>(&mut self, state_machine: &mut S) -> Result<()> {
        let max_message_size = self.opts.max_message_size;
        loop {
            match state_machine.step(&mut self.buffer_set)? {
                Action::ReadMessage => {
                    self.stream.read_message(&mut self.buffer_set, max_message_size)?;
                }
                Action::Write => {
                    self.stream.write_all(&self.buffer_set.write_buffer)?;
                    self.stream.flush()?;
                }
                Action::WriteAndReadMessage => {
                    self.stream.write_all(&self.buffer_set.write_buffer)?;
                    self.stream.flush()?;
                    self.stream.read_message(&mut self.buffer_set, max_message_size)?;
                }
                Action::HandleAsyncMessageAndReadMessage(msg) => {
                    self.handle_async(&msg);
                    self.stream.read_message(&mut self.buffer_set, max_message_size)?;
                }
                Action::WriteAndReadByte | Action::TlsHandshake => {
                    return Err(Error::Protocol(
                        "connection setup requested after startup".into(),
                    ));
                }
                Action::Finished => return Ok(()),
            }
        }
    }

    fn handle_async(&mut self, msg: &AsyncMessage) {
        match msg {
            AsyncMessage::ParameterChanged { name, value } => {
                record_parameter(&mut self.server_params, &mut self.registry, name, value);
            }
            other => self.listeners.dispatch(other),
        }
    }

    /// Send BEGIN when autocommit is off and no transaction is open.
    pub(super) fn begin_if_needed(&mut self) -> Result<()> {
        if !self.auto_commit && self.transaction_status == TransactionStatus::Idle {
            self.simple("BEGIN", &mut DropHandler::new())?;
        }
        Ok(())
    }

    fn simple<H: RowHandler>(&mut self, sql: &str, handler: &mut H) -> Result<()> {
        let mut state_machine = SimpleQueryStateMachine::new(handler, &mut self.buffer_set, sql);
        self.drive(&mut state_machine)
    }

    // === Simple Query Protocol ===

    /// Execute a simple query with a handler.
    ///
    /// `sql` may hold several statements; every result goes to `handler`.
    pub fn query<H: RowHandler>(&mut self, sql: &str, handler: &mut H) -> Result<()> {
        self.check_open()?;
        self.begin_if_needed()?;
        self.simple(sql, handler)
    }

    /// Execute a simple query and discard results.
    pub fn query_drop(&mut self, sql: &str) -> Result<Option<u64>> {
        let mut handler = DropHandler::new();
        self.query(sql, &mut handler)?;
        Ok(handler.rows_affected())
    }

    /// Execute a simple query and collect typed rows.
    ///
    /// ```ignore
    /// let rows: Vec<(i32, String)> = conn.query_collect("SELECT id, name FROM users")?;
    /// ```
    pub fn query_collect<T: for<'a> FromRow<'a>>(&mut self, sql: &str) -> Result<Vec<T>> {
        let mut handler = CollectHandler::<T>::new();
        self.query(sql, &mut handler)?;
        Ok(handler.into_rows())
    }

    /// Execute a simple query and return the first typed row.
    pub fn query_first<T: for<'a> FromRow<'a>>(&mut self, sql: &str) -> Result<Option<T>> {
        let mut handler = FirstRowHandler::<T>::new();
        self.query(sql, &mut handler)?;
        Ok(handler.into_row())
    }

    /// Execute a simple query and decode rows through the type registry.
    pub fn query_rows(&mut self, sql: &str) -> Result<Vec<Row>> {
        let mut handler = RowsHandler::new();
        self.query(sql, &mut handler)?;
        self.decode_rows(handler.rows())
    }

    /// Round trip an empty query.
    ///
    /// Pending notifications and notices are dispatched along the way.
    pub fn ping(&mut self) -> Result<()> {
        self.check_open()?;
        self.simple("", &mut DropHandler::new())
    }

    /// Close the connection gracefully.
    pub fn close(mut self) -> Result<()> {
        self.terminate()
    }

    fn terminate(&mut self) -> Result<()> {
        if self.is_broken {
            return Ok(());
        }
        self.is_broken = true;
        self.buffer_set.write_buffer.clear();
        write_terminate(&mut self.buffer_set.write_buffer);
        self.stream.write_all(&self.buffer_set.write_buffer)?;
        self.stream.flush()?;
        Ok(())
    }

    // === Extended Query Protocol ===

    /// Prepare `sql` as a named statement.
    ///
    /// `?` placeholders and escapes are rewritten first. The statement
    /// lands in the statement cache, so a later `exec` with the same text
    /// reuses it.
    pub fn prepare(&mut self, sql: &str) -> Result<Arc<PreparedStatement>> {
        self.check_open()?;
        let sql = sql::rewrite(sql)?;
        let mut evicted = Vec::new();
        let stmt = self.prepare_deferred(&sql, &mut evicted)?;
        self.close_evicted(evicted)?;
        Ok(stmt)
    }

    /// Close a prepared statement on the server and drop it from the cache.
    pub fn close_statement(&mut self, stmt: &PreparedStatement) -> Result<()> {
        self.check_open()?;
        if self
            .cache
            .get(stmt.sql())
            .is_some_and(|cached| cached.name() == stmt.name())
        {
            self.cache.remove(stmt.sql());
        }
        self.close_named(stmt.name())
    }

    fn close_named(&mut self, name: &str) -> Result<()> {
        let mut handler = DropHandler::new();
        let mut state_machine =
            ExtendedQueryStateMachine::close_statement(&mut handler, &mut self.buffer_set, name);
        self.drive(&mut state_machine)
    }

    fn prepare_named(&mut self, name: &str, sql: &str) -> Result<PreparedStatement> {
        let mut handler = DropHandler::new();
        let mut state_machine =
            ExtendedQueryStateMachine::prepare(&mut handler, &mut self.buffer_set, name, sql);
        self.drive(&mut state_machine)?;
        state_machine
            .take_prepared_statement()
            .ok_or_else(|| Error::Protocol("server did not describe the statement".into()))
    }

    /// Look up `sql` in the cache or prepare it under a fresh name.
    ///
    /// Names of statements that must be closed (evicted entries, or the new
    /// statement itself when caching is off) are pushed to `to_close`.
    fn prepare_deferred(
        &mut self,
        sql: &str,
        to_close: &mut Vec<String>,
    ) -> Result<Arc<PreparedStatement>> {
        if let Some(stmt) = self.cache.get(sql) {
            tracing::debug!(name = stmt.name(), "statement cache hit");
            return Ok(stmt);
        }
        let name = self.cache.next_name();
        tracing::debug!(%name, "statement cache miss");
        let stmt = Arc::new(self.prepare_named(&name, sql)?);
        if self.cache.is_enabled() {
            if let Some(evicted) = self.cache.insert(sql.to_owned(), Arc::clone(&stmt)) {
                tracing::debug!(name = evicted.name(), "evicting cached statement");
                to_close.push(evicted.name().to_owned());
            }
        } else {
            to_close.push(name);
        }
        Ok(stmt)
    }

    /// Statement to execute `sql` with; unnamed when caching is off.
    fn prepare_cached(&mut self, sql: &str) -> Result<Arc<PreparedStatement>> {
        if !self.cache.is_enabled() {
            return Ok(Arc::new(self.prepare_named("", sql)?));
        }
        let mut evicted = Vec::new();
        let stmt = self.prepare_deferred(sql, &mut evicted)?;
        self.close_evicted(evicted)?;
        Ok(stmt)
    }

    fn close_evicted(&mut self, names: Vec<String>) -> Result<()> {
        for name in names {
            if let Err(e) = self.close_named(&name) {
                tracing::warn!(%name, error = %e, "failed to close statement");
                if e.is_connection_broken() {
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn execute_prepared<P: ToParams + ?Sized, H: RowHandler>(
        &mut self,
        stmt: &PreparedStatement,
        params: &P,
        handler: &mut H,
    ) -> Result<()> {
        let formats = result_formats(&self.registry, stmt);
        let mut state_machine = ExtendedQueryStateMachine::execute(
            handler,
            &mut self.buffer_set,
            stmt,
            params,
            &formats,
        )?;
        self.drive(&mut state_machine)
    }

    fn exec_sql<P: ToParams + ?Sized, H: RowHandler>(
        &mut self,
        sql: &str,
        params: &P,
        handler: &mut H,
    ) -> Result<()> {
        let sql = sql::rewrite(sql)?;
        let stmt = self.prepare_cached(&sql)?;
        match self.execute_prepared(&stmt, params, handler) {
            Err(e)
                if e.is_stale_statement()
                    && !stmt.is_unnamed()
                    && self.transaction_status == TransactionStatus::Idle =>
            {
                tracing::debug!(name = stmt.name(), sqlstate = ?e.sqlstate(), "re-preparing statement");
                self.cache.remove(&sql);
                self.close_evicted(vec![stmt.name().to_owned()])?;
                let fresh = self.prepare_cached(&sql)?;
                self.execute_prepared(&fresh, params, handler)
            }
            other => other,
        }
    }

    /// Execute a statement with a handler.
    ///
    /// `statement` is SQL text (rewritten and cached) or a
    /// [`PreparedStatement`].
    pub fn exec<S: IntoStatement, P: ToParams, H: RowHandler>(
        &mut self,
        statement: S,
        params: P,
        handler: &mut H,
    ) -> Result<()> {
        self.check_open()?;
        self.begin_if_needed()?;
        match (statement.as_prepared(), statement.as_sql()) {
            (Some(stmt), _) => self.execute_prepared(stmt, &params, handler),
            (None, Some(sql)) => self.exec_sql(sql, &params, handler),
            (None, None) => Err(Error::InvalidUsage("empty statement reference".into())),
        }
    }

    /// Execute a statement and return the affected row count.
    pub fn exec_drop<S: IntoStatement, P: ToParams>(
        &mut self,
        statement: S,
        params: P,
    ) -> Result<Option<u64>> {
        let mut handler = DropHandler::new();
        self.exec(statement, params, &mut handler)?;
        Ok(handler.rows_affected())
    }

    /// Execute a statement and collect typed rows.
    ///
    /// ```ignore
    /// let rows: Vec<(i32, String)> =
    ///     conn.exec_collect("SELECT id, name FROM users WHERE id = ?", (42,))?;
    /// ```
    pub fn exec_collect<T: for<'a> FromRow<'a>, S: IntoStatement, P: ToParams>(
        &mut self,
        statement: S,
        params: P,
    ) -> Result<Vec<T>> {
        let mut handler = CollectHandler::<T>::new();
        self.exec(statement, params, &mut handler)?;
        Ok(handler.into_rows())
    }

    pub fn exec_first<T: for<'a> FromRow<'a>, S: IntoStatement, P: ToParams>(
        &mut self,
        statement: S,
        params: P,
    ) -> Result<Option<T>> {
        let mut handler = FirstRowHandler::<T>::new();
        self.exec(statement, params, &mut handler)?;
        Ok(handler.into_row())
    }

    /// Execute a statement and decode rows through the type registry.
    ///
    /// Column types the registry has not seen are looked up in the server
    /// catalog once before decoding.
    pub fn exec_rows<S: IntoStatement, P: ToParams>(
        &mut self,
        statement: S,
        params: P,
    ) -> Result<Vec<Row>> {
        let mut handler = RowsHandler::new();
        self.exec(statement, params, &mut handler)?;
        self.decode_rows(handler.rows())
    }

    pub(super) fn decode_rows(&mut self, raw: &[RawRow]) -> Result<Vec<Row>> {
        let missing = row::unknown_column_types(&self.registry, raw);
        if !missing.is_empty() {
            self.refresh_catalog(missing)?;
            if let Some(oid) = row::unknown_column_types(&self.registry, raw).first() {
                return Err(Error::Protocol(format!(
                    "type oid {} is not in the server catalog",
                    oid
                )));
            }
        }
        row::decode_rows(&self.registry, raw)
    }

    /// Load type descriptors for `missing` from the server catalog.
    pub fn refresh_catalog(&mut self, missing: Vec<Oid>) -> Result<()> {
        self.check_open()?;
        let mut refresh = CatalogRefresh::new(missing);
        while let Some(query) = refresh.next_query() {
            let mut handler = RowsHandler::new();
            self.simple(&query, &mut handler)?;
            refresh.ingest(&self.registry, &handler.text_rows()?)?;
        }
        Ok(())
    }

    /// Bind a named portal for [`Cursor`](super::Cursor).
    pub(super) fn bind_cursor<P: ToParams + ?Sized>(
        &mut self,
        sql: &str,
        params: &P,
    ) -> Result<(String, Vec<crate::statement::ColumnInfo>)> {
        let sql = sql::rewrite(sql)?;
        let stmt = self.prepare_cached(&sql)?;
        self.portal_counter += 1;
        let portal = format!("_ngp_{}", self.portal_counter);
        let formats = result_formats(&self.registry, &stmt);
        let mut handler = DropHandler::new();
        let mut state_machine = ExtendedQueryStateMachine::bind_portal(
            &mut handler,
            &mut self.buffer_set,
            &portal,
            &stmt,
            params,
            &formats,
        )?;
        self.drive(&mut state_machine)?;
        let columns = crate::state::extended::apply_formats(stmt.columns(), &formats);
        Ok((portal, columns))
    }

    /// Run Execute on an open portal; true when more rows remain.
    pub(super) fn fetch_portal(
        &mut self,
        portal: &str,
        columns: &[crate::statement::ColumnInfo],
        max_rows: u32,
    ) -> Result<(Vec<Row>, bool)> {
        let mut handler = RowsHandler::new();
        let mut state_machine = ExtendedQueryStateMachine::fetch(
            &mut handler,
            &mut self.buffer_set,
            portal,
            columns,
            max_rows,
        );
        self.drive(&mut state_machine)?;
        let more = state_machine.is_suspended();
        let rows = self.decode_rows(handler.rows())?;
        Ok((rows, more))
    }

    pub(super) fn close_portal(&mut self, portal: &str) -> Result<()> {
        let mut handler = DropHandler::new();
        let mut state_machine =
            ExtendedQueryStateMachine::close_portal(&mut handler, &mut self.buffer_set, portal);
        self.drive(&mut state_machine)
    }

    // === Batches ===

    /// Execute every item of `batch`.
    ///
    /// See [`Batch`] for the strict and non-strict semantics.
    pub fn exec_batch(&mut self, batch: &Batch) -> Result<Vec<BatchOutcome>> {
        self.check_open()?;
        self.begin_if_needed()?;
        let mut to_close = Vec::new();
        let result = if batch.is_strict(self.opts.strict_batch) {
            self.run_strict_batch(batch, &mut to_close)
        } else {
            self.run_lenient_batch(batch, &mut to_close)
        };
        if !self.is_broken {
            self.close_evicted(to_close)?;
        }
        result
    }

    fn batch_statement(
        &mut self,
        index: usize,
        target: &BatchTarget,
        to_close: &mut Vec<String>,
    ) -> Result<Arc<PreparedStatement>> {
        let stmt = match target {
            BatchTarget::Prepared(stmt) => Arc::clone(stmt),
            BatchTarget::Sql(sql) => {
                let sql = sql::rewrite(sql)?;
                self.prepare_deferred(&sql, to_close)?
            }
        };
        check_executable(index, &stmt)?;
        Ok(stmt)
    }

    fn run_strict_batch(&mut self, batch: &Batch, to_close: &mut Vec<String>) -> Result<Vec<BatchOutcome>> {
        let mut outcomes = Vec::with_capacity(batch.len());
        for (index, item) in batch.items().iter().enumerate() {
            let stmt = match self.batch_statement(index, &item.target, to_close) {
                Ok(stmt) => stmt,
                Err(e) if e.is_connection_broken() => return Err(e),
                Err(e) => return Err(BatchError::new(outcomes, index, e).into()),
            };
            self.buffer_set.write_buffer.clear();
            if let Err(e) = write_item(&mut self.buffer_set.write_buffer, &stmt, item.params.as_ref()) {
                return Err(BatchError::new(outcomes, index, e).into());
            }
            let mut state_machine = BatchStateMachine::new(1);
            if let Err(e) = self.drive(&mut state_machine) {
                return Err(BatchError::new(outcomes, index, e).into());
            }
            match state_machine.take_outcomes().pop() {
                Some(Ok(outcome)) => outcomes.push(outcome),
                Some(Err(e)) => return Err(BatchError::new(outcomes, index, e).into()),
                None => return Err(Error::Protocol("batch item produced no response".into())),
            }
        }
        Ok(outcomes)
    }

    /// Items whose statement is already known are pipelined. The pipeline
    /// is flushed before any item that needs a Parse, so each statement is
    /// prepared against the effects of every item before it.
    fn run_lenient_batch(&mut self, batch: &Batch, to_close: &mut Vec<String>) -> Result<Vec<BatchOutcome>> {
        let mut run = NonStrictRun::new(batch.len());
        self.buffer_set.write_buffer.clear();
        for (index, item) in batch.items().iter().enumerate() {
            if needs_parse(&self.cache, &item.target) {
                self.flush_batch(&mut run)?;
            }
            let stmt = match self.batch_statement(index, &item.target, to_close) {
                Ok(stmt) => stmt,
                Err(e) if e.is_connection_broken() => return Err(e),
                Err(e) => {
                    run.reject(index, e);
                    continue;
                }
            };
            let mark = self.buffer_set.write_buffer.len();
            match write_item(&mut self.buffer_set.write_buffer, &stmt, item.params.as_ref()) {
                Ok(()) => run.queue(index),
                Err(e) => {
                    self.buffer_set.write_buffer.truncate(mark);
                    run.reject(index, e);
                }
            }
        }
        self.flush_batch(&mut run)?;
        run.finish()
    }

    /// Send the queued items and record their results.
    fn flush_batch(&mut self, run: &mut NonStrictRun) -> Result<()> {
        if run.queued() == 0 {
            return Ok(());
        }
        let mut state_machine = BatchStateMachine::new(run.queued());
        self.drive(&mut state_machine)?;
        run.complete(state_machine.take_outcomes())?;
        self.buffer_set.write_buffer.clear();
        Ok(())
    }

    // === Transactions ===

    pub fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    /// Switch autocommit. Turning it on commits an open transaction.
    pub fn set_auto_commit(&mut self, auto_commit: bool) -> Result<()> {
        if auto_commit && !self.auto_commit && self.in_transaction() {
            self.commit()?;
        }
        self.auto_commit = auto_commit;
        Ok(())
    }

    /// Open a transaction block.
    pub fn begin(&mut self) -> Result<()> {
        self.check_open()?;
        if self.in_transaction() {
            return Err(Error::InvalidUsage("a transaction is already open".into()));
        }
        self.simple("BEGIN", &mut DropHandler::new())
    }

    pub fn commit(&mut self) -> Result<()> {
        self.check_open()?;
        self.simple("COMMIT", &mut DropHandler::new())
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.check_open()?;
        self.simple("ROLLBACK", &mut DropHandler::new())
    }

    pub(super) fn run_control(&mut self, sql: &str) -> Result<()> {
        self.check_open()?;
        self.simple(sql, &mut DropHandler::new())
    }

    // === Notifications ===

    pub fn add_notification_listener<F>(&mut self, filter: Option<&str>, callback: F) -> Result<ListenerId>
    where
        F: FnMut(&Notification) + Send + 'static,
    {
        self.listeners.add(filter, callback)
    }

    pub fn remove_notification_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Install the notice sink; `None` goes back to logging notices.
    pub fn set_notice_handler(&mut self, handler: Option<NoticeHandler>) {
        self.listeners.set_notice_handler(handler);
    }

    pub fn listen(&mut self, channel: &str) -> Result<()> {
        self.query_drop(&format!("LISTEN {}", sql::quote_identifier(channel)))
            .map(drop)
    }

    pub fn unlisten(&mut self, channel: &str) -> Result<()> {
        self.query_drop(&format!("UNLISTEN {}", sql::quote_identifier(channel)))
            .map(drop)
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        let _ = self.terminate();
    }
}

/// Run the startup exchange, upgrading to TLS when the server agrees.
fn startup(
    mut stream: Stream,
    buffer_set: &mut BufferSet,
    state_machine: &mut ConnectionStateMachine,
    opts: &Opts,
) -> Result<Stream> {
    loop {
        match state_machine.step(buffer_set)? {
            Action::WriteAndReadByte => {
                stream.write_all(&buffer_set.write_buffer)?;
                stream.flush()?;
                let response = stream.read_byte()?;
                state_machine.set_ssl_response(response);
            }
            Action::TlsHandshake => {
                stream = tls_handshake(stream, state_machine, opts)?;
            }
            Action::ReadMessage => stream.read_message(buffer_set, opts.max_message_size)?,
            Action::Write => {
                stream.write_all(&buffer_set.write_buffer)?;
                stream.flush()?;
            }
            Action::WriteAndReadMessage => {
                stream.write_all(&buffer_set.write_buffer)?;
                stream.flush()?;
                stream.read_message(buffer_set, opts.max_message_size)?;
            }
            Action::HandleAsyncMessageAndReadMessage(msg) => {
                tracing::debug!(?msg, "asynchronous message during startup");
                stream.read_message(buffer_set, opts.max_message_size)?;
            }
            Action::Finished => return Ok(stream),
        }
    }
}

#[cfg(feature = "sync-tls")]
fn tls_handshake(stream: Stream, state_machine: &mut ConnectionStateMachine, opts: &Opts) -> Result<Stream> {
    let (stream, der) = stream.upgrade_tls(opts)?;
    if opts.ssl_mode == crate::opts::SslMode::VerifyFull {
        let der = der
            .as_deref()
            .ok_or_else(|| Error::HostNameMismatch("server presented no certificate".into()))?;
        crate::tls::verify_host_name(&opts.host, der)?;
    }
    tracing::debug!(mode = ?opts.ssl_mode, "TLS established");
    state_machine.set_tls_established(der.as_deref().map(crate::tls::channel_binding_hash));
    Ok(stream)
}

#[cfg(not(feature = "sync-tls"))]
fn tls_handshake(_stream: Stream, _state_machine: &mut ConnectionStateMachine, opts: &Opts) -> Result<Stream> {
    Err(Error::Unsupported(format!(
        "server accepted TLS for sslmode {:?} but the sync-tls feature is off",
        opts.ssl_mode
    )))
}

impl Executes for Conn {
    fn execute(&mut self, sql: &str) -> Result<u64> {
        Ok(self.query_drop(sql)?.unwrap_or(0))
    }

    fn query_text(&mut self, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
        let mut handler = RowsHandler::new();
        self.query(sql, &mut handler)?;
        handler.text_rows()
    }

    fn backend_pid(&self) -> u32 {
        self.connection_id()
    }

    fn state(&self) -> SessionState {
        Conn::state(self)
    }
}

impl TransactionControl for Conn {
    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<()> {
        Conn::set_auto_commit(self, auto_commit)
    }

    fn commit(&mut self) -> Result<()> {
        Conn::commit(self)
    }

    fn rollback(&mut self) -> Result<()> {
        Conn::rollback(self)
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }
}

impl NotificationSource for Conn {
    fn add_notification_listener<F>(&mut self, filter: Option<&str>, callback: F) -> Result<ListenerId>
    where
        F: FnMut(&Notification) + Send + 'static,
    {
        Conn::add_notification_listener(self, filter, callback)
    }

    fn remove_notification_listener(&mut self, id: ListenerId) -> bool {
        Conn::remove_notification_listener(self, id)
    }

    fn set_notice_handler(&mut self, handler: Option<NoticeHandler>) {
        Conn::set_notice_handler(self, handler);
    }
}
