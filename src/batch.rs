//! Batches of parameterized statements executed with one call.
//!
//! A batch may not contain row-returning statements. An item's statement is
//! prepared (or taken from the statement cache) only after every earlier
//! item has run, so later items may use objects earlier ones create.
//!
//! - Strict batches run one round trip per item and stop at the first
//!   failure. [`BatchError::outcomes`] then holds exactly the items that
//!   succeeded, so its length equals [`BatchError::failed_index`].
//! - Non-strict batches pipeline items with their own Sync each, so a
//!   failure does not skip the items after it. The pipeline is flushed
//!   whenever the next item needs a Parse. Outcomes cover the whole input.

use std::sync::Arc;

use crate::cache::StatementCache;
use crate::conversion::ToParams;
use crate::error::{Error, Result};
use crate::protocol::frontend::{write_bind, write_execute, write_sync};
use crate::statement::PreparedStatement;

/// What happened to one batch item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The command tag carried this row count
    RowCount(u64),
    /// The command succeeded without reporting a count (DDL and the like)
    SuccessNoInfo,
    /// The item failed or was not executed
    Failed,
}

/// A batch that did not complete.
#[derive(Debug, thiserror::Error)]
#[error("batch item {failed_index} failed: {source}")]
pub struct BatchError {
    pub outcomes: Vec<BatchOutcome>,
    /// First failing item
    pub failed_index: usize,
    pub source: Error,
}

impl BatchError {
    pub fn new(outcomes: Vec<BatchOutcome>, failed_index: usize, source: Error) -> Self {
        Self {
            outcomes,
            failed_index,
            source,
        }
    }
}

impl From<BatchError> for Error {
    fn from(err: BatchError) -> Self {
        Error::Batch(Box::new(err))
    }
}

/// Statement of a batch item.
#[derive(Debug, Clone)]
pub enum BatchTarget {
    /// SQL text, rewritten and prepared through the statement cache
    Sql(String),
    Prepared(Arc<PreparedStatement>),
}

/// One statement and its parameters.
pub struct BatchItem {
    pub target: BatchTarget,
    pub params: Box<dyn ToParams + Send>,
}

impl std::fmt::Debug for BatchItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchItem")
            .field("target", &self.target)
            .field("params", &self.params.param_count())
            .finish()
    }
}

/// Builder for [`exec_batch`](crate::sync::Conn::exec_batch).
///
/// ```ignore
/// let outcomes = conn.exec_batch(
///     &Batch::new()
///         .strict(true)
///         .add("INSERT INTO t VALUES (?)", (1_i32,))
///         .add("INSERT INTO t VALUES (?)", (2_i32,)),
/// )?;
/// ```
#[derive(Debug, Default)]
pub struct Batch {
    items: Vec<BatchItem>,
    strict: Option<bool>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the connection's `strict_batch` setting.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }

    /// Append SQL text with `?` or `$n` placeholders.
    pub fn add<P>(mut self, sql: impl Into<String>, params: P) -> Self
    where
        P: ToParams + Send + 'static,
    {
        self.push(sql, params);
        self
    }

    /// Append an already prepared statement.
    pub fn add_prepared<P>(mut self, stmt: &Arc<PreparedStatement>, params: P) -> Self
    where
        P: ToParams + Send + 'static,
    {
        self.push_prepared(stmt, params);
        self
    }

    pub fn push<P>(&mut self, sql: impl Into<String>, params: P)
    where
        P: ToParams + Send + 'static,
    {
        self.items.push(BatchItem {
            target: BatchTarget::Sql(sql.into()),
            params: Box::new(params),
        });
    }

    pub fn push_prepared<P>(&mut self, stmt: &Arc<PreparedStatement>, params: P)
    where
        P: ToParams + Send + 'static,
    {
        self.items.push(BatchItem {
            target: BatchTarget::Prepared(Arc::clone(stmt)),
            params: Box::new(params),
        });
    }

    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Strictness to use, given the connection default.
    pub fn is_strict(&self, default: bool) -> bool {
        self.strict.unwrap_or(default)
    }
}

/// Refuse statements that describe result columns.
pub(crate) fn check_executable(index: usize, stmt: &PreparedStatement) -> Result<()> {
    if stmt.returns_rows() {
        return Err(Error::InvalidUsage(format!(
            "batch item {} returns rows; batches only accept statements without results",
            index
        )));
    }
    Ok(())
}

/// True when running `target` starts with a Parse.
pub(crate) fn needs_parse(cache: &StatementCache, target: &BatchTarget) -> bool {
    match target {
        BatchTarget::Prepared(_) => false,
        BatchTarget::Sql(sql) => match crate::sql::rewrite(sql) {
            Ok(sql) => !cache.contains(&sql),
            Err(_) => false,
        },
    }
}

/// Queue Bind + Execute + Sync for one item.
pub(crate) fn write_item(buf: &mut Vec<u8>, stmt: &PreparedStatement, params: &(dyn ToParams + Send)) -> Result<()> {
    write_bind(buf, "", stmt.name(), params, stmt.param_oids(), &[])?;
    write_execute(buf, "", 0);
    write_sync(buf);
    Ok(())
}

/// Per-item state of a non-strict batch while it runs.
#[derive(Debug, Default)]
pub(crate) struct NonStrictRun {
    slots: Vec<Option<Result<BatchOutcome>>>,
    /// Input indices of the items that were queued, in order
    queued: Vec<usize>,
}

impl NonStrictRun {
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| None).collect(),
            queued: Vec::new(),
        }
    }

    /// Record an item that is not executed.
    pub fn reject(&mut self, index: usize, error: Error) {
        self.slots[index] = Some(Err(error));
    }

    pub fn queue(&mut self, index: usize) {
        self.queued.push(index);
    }

    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// Attach the pipelined results, in queue order.
    pub fn complete(&mut self, results: Vec<Result<BatchOutcome>>) -> Result<()> {
        if results.len() != self.queued.len() {
            return Err(Error::Protocol(format!(
                "batch expected {} responses, got {}",
                self.queued.len(),
                results.len()
            )));
        }
        for (index, result) in self.queued.drain(..).zip(results) {
            self.slots[index] = Some(result);
        }
        Ok(())
    }

    /// All outcomes, or a [`BatchError`] naming the first failure.
    pub fn finish(self) -> Result<Vec<BatchOutcome>> {
        let mut outcomes = Vec::with_capacity(self.slots.len());
        let mut first_error = None;
        for (index, slot) in self.slots.into_iter().enumerate() {
            match slot {
                Some(Ok(outcome)) => outcomes.push(outcome),
                Some(Err(e)) => {
                    outcomes.push(BatchOutcome::Failed);
                    if first_error.is_none() {
                        first_error = Some((index, e));
                    }
                }
                None => {
                    outcomes.push(BatchOutcome::Failed);
                    if first_error.is_none() {
                        first_error = Some((index, Error::Protocol("batch item has no result".into())));
                    }
                }
            }
        }
        match first_error {
            None => Ok(outcomes),
            Some((index, source)) => Err(BatchError::new(outcomes, index, source).into()),
        }
    }
}

/// Outcome of an item from its command tag row count.
pub(crate) fn outcome_from(rows: Option<u64>) -> BatchOutcome {
    match rows {
        Some(n) => BatchOutcome::RowCount(n),
        None => BatchOutcome::SuccessNoInfo,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::{FormatCode, oid};
    use crate::statement::ColumnInfo;

    fn stmt(columns: usize) -> PreparedStatement {
        let column = ColumnInfo {
            name: "x".into(),
            table_oid: 0,
            column_id: 0,
            type_oid: oid::INT4,
            type_size: 4,
            type_modifier: -1,
            format: FormatCode::Text,
        };
        PreparedStatement::new("s".into(), "SQL".into(), vec![oid::INT4], vec![column; columns])
    }

    #[test]
    fn test_builder() {
        let shared = Arc::new(stmt(0));
        let batch = Batch::new()
            .add("INSERT INTO t VALUES (?)", (1_i32,))
            .add_prepared(&shared, (2_i32,));
        assert_eq!(batch.len(), 2);
        assert!(!batch.is_strict(false));
        assert!(batch.strict(true).is_strict(false));
    }

    #[test]
    fn test_row_returning_rejected() {
        assert!(check_executable(0, &stmt(0)).is_ok());
        assert!(matches!(check_executable(3, &stmt(1)), Err(Error::InvalidUsage(_))));
    }

    #[test]
    fn test_needs_parse_follows_cache() {
        let mut cache = StatementCache::new(4);
        let sql = Batch::new().add("INSERT INTO t VALUES (?)", (1_i32,));
        let target = &sql.items()[0].target;
        assert!(needs_parse(&cache, target));

        let rewritten = crate::sql::rewrite("INSERT INTO t VALUES (?)").unwrap();
        cache.insert(rewritten, Arc::new(stmt(0)));
        assert!(!needs_parse(&cache, target));
        assert!(!needs_parse(&cache, &BatchTarget::Prepared(Arc::new(stmt(0)))));
        assert!(needs_parse(&StatementCache::new(0), target));
    }

    #[test]
    fn test_write_item_messages() {
        let mut buf = Vec::new();
        write_item(&mut buf, &stmt(0), &(5_i32,)).unwrap();
        assert_eq!(crate::state::testing::frontend_tags(&buf), vec![b'B', b'E', b'S']);
    }

    #[test]
    fn test_non_strict_outcomes_cover_input() {
        let mut run = NonStrictRun::new(4);
        run.queue(0);
        run.reject(1, Error::InvalidUsage("returns rows".into()));
        run.queue(2);
        run.queue(3);
        run.complete(vec![
            Ok(BatchOutcome::RowCount(1)),
            Err(Error::Protocol("boom".into())),
            Ok(BatchOutcome::SuccessNoInfo),
        ])
        .unwrap();
        let Err(Error::Batch(err)) = run.finish() else {
            panic!("expected a batch error");
        };
        assert_eq!(err.failed_index, 1);
        assert_eq!(
            err.outcomes,
            vec![
                BatchOutcome::RowCount(1),
                BatchOutcome::Failed,
                BatchOutcome::Failed,
                BatchOutcome::SuccessNoInfo
            ]
        );
    }

    #[test]
    fn test_non_strict_success() {
        let mut run = NonStrictRun::new(1);
        run.queue(0);
        run.complete(vec![Ok(outcome_from(Some(2)))]).unwrap();
        assert_eq!(run.finish().unwrap(), vec![BatchOutcome::RowCount(2)]);
    }
}
