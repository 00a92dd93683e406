#![forbid(unsafe_code)]

//! Statement execution: the executor seam, result rows, and the [`Session`]
//! that ties compiled statements to an executor.

/// Batch partitioning and the forward-only batch cursor.
pub mod batch;

/// `rusqlite`-backed executor.
#[cfg(feature = "sqlite")]
pub mod sqlite;

use tracing::{debug, trace, warn};

use crate::context::Context;
use crate::error::{ExecutorError, ExecutorErrorKind, QueryError, Result};
use crate::query::builder::QueryBuilder;
use crate::query::compiler::{ProjectedColumn, Statement};
use crate::query::derive::{Arg, DerivedQuery, Subject};
use crate::query::dml::{DeleteBuilder, InsertBuilder, UpdateBuilder};
use crate::query::lock::{check_affected, next_version};
use crate::query::predicate::Operand;
use crate::value::{BoundParam, Record, Value};

pub use batch::{partition, BatchCursor, BatchOp, BatchOutcome, BatchSummary, Batches};

/// Runs SQL text with bound parameters.
///
/// Implementations report failures as [`ExecutorError`]; the session wraps
/// them into [`QueryError::ConstraintViolation`] or [`QueryError::Execution`]
/// according to their kind.
pub trait StatementExecutor {
    /// Runs a statement that returns no rows, yielding the affected row count.
    fn execute(&mut self, sql: &str, params: &[BoundParam]) -> std::result::Result<u64, ExecutorError>;

    /// Runs a statement that returns rows.
    fn query(&mut self, sql: &str, params: &[BoundParam])
        -> std::result::Result<Vec<Row>, ExecutorError>;

    /// Opens a savepoint; batches are applied inside one.
    fn savepoint(&mut self, name: &str) -> std::result::Result<(), ExecutorError> {
        self.execute(&format!("SAVEPOINT {name}"), &[]).map(drop)
    }

    /// Keeps the work done since [`savepoint`](Self::savepoint).
    fn release_savepoint(&mut self, name: &str) -> std::result::Result<(), ExecutorError> {
        self.execute(&format!("RELEASE SAVEPOINT {name}"), &[]).map(drop)
    }

    /// Undoes the work done since [`savepoint`](Self::savepoint) and closes it.
    fn rollback_to_savepoint(&mut self, name: &str) -> std::result::Result<(), ExecutorError> {
        self.execute(&format!("ROLLBACK TO SAVEPOINT {name}"), &[])?;
        self.release_savepoint(name)
    }
}

impl<E: StatementExecutor + ?Sized> StatementExecutor for &mut E {
    fn execute(&mut self, sql: &str, params: &[BoundParam]) -> std::result::Result<u64, ExecutorError> {
        (**self).execute(sql, params)
    }

    fn query(
        &mut self,
        sql: &str,
        params: &[BoundParam],
    ) -> std::result::Result<Vec<Row>, ExecutorError> {
        (**self).query(sql, params)
    }

    fn savepoint(&mut self, name: &str) -> std::result::Result<(), ExecutorError> {
        (**self).savepoint(name)
    }

    fn release_savepoint(&mut self, name: &str) -> std::result::Result<(), ExecutorError> {
        (**self).release_savepoint(name)
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> std::result::Result<(), ExecutorError> {
        (**self).rollback_to_savepoint(name)
    }
}

/// One result row, values in select-list order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Turns rows of a compiled select into caller values.
pub trait ResultMaterializer {
    type Output;

    fn materialize(&self, projection: &[ProjectedColumn], row: Row) -> Result<Self::Output>;
}

impl<F, T> ResultMaterializer for F
where
    F: Fn(&[ProjectedColumn], Row) -> Result<T>,
{
    type Output = T;

    fn materialize(&self, projection: &[ProjectedColumn], row: Row) -> Result<T> {
        self(projection, row)
    }
}

/// Builds the root-entity [`Record`] of an entity projection.
///
/// Columns of eagerly joined relations are skipped, except the identity of a
/// direct relation, which fills the owning foreign-key column.
#[derive(Clone, Copy, Debug, Default)]
pub struct RecordMaterializer;

impl ResultMaterializer for RecordMaterializer {
    type Output = Record;

    fn materialize(&self, projection: &[ProjectedColumn], row: Row) -> Result<Record> {
        let entity = projection
            .iter()
            .find(|c| c.node.is_empty())
            .map(|c| c.entity.clone())
            .ok_or_else(|| {
                QueryError::InvalidArgument("statement does not project an entity".into())
            })?;
        if projection.len() != row.len() {
            return Err(QueryError::InvalidArgument(format!(
                "row has {} value(s) for {} projected column(s)",
                row.len(),
                projection.len()
            )));
        }
        let mut record = Record::new(entity);
        for (column, value) in projection.iter().zip(row.into_values()) {
            if column.node.is_empty() {
                record.set(column.column.clone(), value);
            } else if let Some(owning) = &column.parent_column {
                if !column.node.contains('.') {
                    record.set(owning.clone(), value);
                }
            }
        }
        Ok(record)
    }
}

/// Result of running a derived query.
#[derive(Clone, Debug, PartialEq)]
pub enum DerivedOutcome {
    Records(Vec<Record>),
    Count(u64),
    Exists(bool),
    Deleted(u64),
}

/// Executes compiled statements against one executor.
///
/// The session owns no transaction: every call is one round trip, and a
/// failed call leaves earlier calls applied. Batch cursors are the exception;
/// each batch runs inside a savepoint and is rolled back whole on failure.
pub struct Session<E> {
    executor: E,
    ctx: Context,
}

impl<E: StatementExecutor> Session<E> {
    pub fn new(executor: E, ctx: Context) -> Self {
        Self { executor, ctx }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    pub fn into_inner(self) -> E {
        self.executor
    }

    /// Runs a row-returning statement.
    pub fn query_rows(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        trace!(sql = %statement.sql, params = statement.params.len(), "session.execute.query");
        let rows = self.executor.query(&statement.sql, &statement.params)?;
        debug!(root = ?statement.root, rows = rows.len(), "session.execute.query");
        Ok(rows)
    }

    /// Runs a statement and classifies a zero-row outcome of record
    /// updates and deletes.
    pub fn execute(&mut self, statement: &Statement) -> Result<u64> {
        trace!(sql = %statement.sql, params = statement.params.len(), "session.execute.update");
        let affected = self.executor.execute(&statement.sql, &statement.params)?;
        debug!(
            root = ?statement.root,
            kind = ?statement.kind,
            affected,
            "session.execute.update"
        );
        check_affected(statement, affected)?;
        Ok(affected)
    }

    /// Runs the select and materializes each row.
    pub fn fetch_with<M: ResultMaterializer>(
        &mut self,
        query: &QueryBuilder,
        materializer: &M,
    ) -> Result<Vec<M::Output>> {
        let statement = query.to_statement(&self.ctx)?;
        self.query_rows(&statement)?
            .into_iter()
            .map(|row| materializer.materialize(&statement.projection, row))
            .collect()
    }

    /// Runs an entity select and returns root records.
    pub fn fetch_all(&mut self, query: &QueryBuilder) -> Result<Vec<Record>> {
        self.fetch_with(query, &RecordMaterializer)
    }

    /// First record of the select, if any.
    pub fn fetch_optional(&mut self, query: &QueryBuilder) -> Result<Option<Record>> {
        Ok(self.fetch_all(&query.clone().limit(1))?.into_iter().next())
    }

    /// Loads one row by identity. `id` may be a record for composite keys.
    pub fn find_by_id(&mut self, entity: &str, id: impl Into<Operand>) -> Result<Option<Record>> {
        self.fetch_optional(&QueryBuilder::new(entity).where_id(id))
    }

    pub fn count(&mut self, query: &QueryBuilder) -> Result<u64> {
        let statement = query.to_count_statement(&self.ctx)?;
        let value = self.scalar(&statement)?;
        value
            .as_int()
            .and_then(|count| u64::try_from(count).ok())
            .ok_or_else(|| unexpected(format!("COUNT returned {value}")))
    }

    pub fn exists(&mut self, query: &QueryBuilder) -> Result<bool> {
        let statement = query.to_exists_statement(&self.ctx)?;
        match self.scalar(&statement)? {
            Value::Bool(found) => Ok(found),
            Value::Int(found) => Ok(found != 0),
            other => Err(unexpected(format!("EXISTS returned {other}"))),
        }
    }

    fn scalar(&mut self, statement: &Statement) -> Result<Value> {
        self.query_rows(statement)?
            .into_iter()
            .next()
            .and_then(|row| row.into_values().into_iter().next())
            .ok_or_else(|| unexpected("statement returned no value".into()))
    }

    /// Inserts one record, filling a generated identity and the initial
    /// version back into it.
    pub fn insert(&mut self, record: &mut Record) -> Result<()> {
        self.insert_all(std::slice::from_mut(record))
    }

    /// Inserts records of one entity with a single multi-row statement.
    pub fn insert_all(&mut self, records: &mut [Record]) -> Result<()> {
        let Some(first) = records.first() else {
            return Ok(());
        };
        let entity = first.entity.clone();
        let statement = InsertBuilder::new(entity.as_str())
            .records(records.iter().cloned())
            .to_statement(&self.ctx)?;
        if statement.returning.is_empty() {
            self.execute(&statement)?;
        } else {
            let rows = self.query_rows(&statement)?;
            if rows.len() != records.len() {
                return Err(unexpected(format!(
                    "insert returned {} key row(s) for {} record(s)",
                    rows.len(),
                    records.len()
                )));
            }
            for (record, row) in records.iter_mut().zip(rows) {
                for (column, value) in statement.returning.iter().zip(row.into_values()) {
                    record.set(column.clone(), value);
                }
            }
            debug!(entity = %entity, rows = records.len(), "session.insert.keys");
        }
        let descriptor = self.ctx.descriptor(&entity)?;
        if let Some(version) = descriptor.version_column() {
            for record in records.iter_mut() {
                if record.get(&version.name).is_none() {
                    record.set(version.name.clone(), Value::Int(0));
                }
            }
        }
        Ok(())
    }

    /// Writes every updatable column of `record`. A versioned record is
    /// checked against its current version, which is bumped on success.
    pub fn update(&mut self, record: &mut Record) -> Result<()> {
        let statement = UpdateBuilder::for_record(record.clone()).to_statement(&self.ctx)?;
        self.execute(&statement)?;
        let descriptor = self.ctx.descriptor(&record.entity)?;
        if let Some(version) = descriptor.version_column() {
            let current = record.get(&version.name).cloned().unwrap_or(Value::Null);
            record.set(version.name.clone(), next_version(&current)?);
        }
        Ok(())
    }

    /// Deletes `record` by identity, checking its version when versioned.
    pub fn delete(&mut self, record: &Record) -> Result<()> {
        let statement = DeleteBuilder::for_record(record.clone()).to_statement(&self.ctx)?;
        self.execute(&statement)?;
        Ok(())
    }

    /// Runs a derived query with call arguments.
    pub fn run_derived(&mut self, query: &DerivedQuery, args: &[Arg]) -> Result<DerivedOutcome> {
        match query.subject {
            Subject::Find => Ok(DerivedOutcome::Records(
                self.fetch_all(&query.to_builder(args)?)?,
            )),
            Subject::Count => Ok(DerivedOutcome::Count(self.count(&query.to_builder(args)?)?)),
            Subject::Exists => Ok(DerivedOutcome::Exists(self.exists(&query.to_builder(args)?)?)),
            Subject::Delete => {
                let statement = query.to_statement(&self.ctx, args)?;
                Ok(DerivedOutcome::Deleted(self.execute(&statement)?))
            }
        }
    }

    /// Cursor inserting `records` one multi-row statement per batch.
    /// `batch_size` defaults to the configured size.
    pub fn insert_batched<I>(
        &mut self,
        records: I,
        batch_size: Option<usize>,
    ) -> Result<BatchCursor<'_, E, I::IntoIter>>
    where
        I: IntoIterator<Item = Record>,
    {
        self.batched(BatchOp::Insert, records, batch_size)
    }

    /// Cursor updating `records`, one statement per record, batch by batch.
    pub fn update_batched<I>(
        &mut self,
        records: I,
        batch_size: Option<usize>,
    ) -> Result<BatchCursor<'_, E, I::IntoIter>>
    where
        I: IntoIterator<Item = Record>,
    {
        self.batched(BatchOp::Update, records, batch_size)
    }

    /// Cursor deleting `records`, one statement per record, batch by batch.
    pub fn delete_batched<I>(
        &mut self,
        records: I,
        batch_size: Option<usize>,
    ) -> Result<BatchCursor<'_, E, I::IntoIter>>
    where
        I: IntoIterator<Item = Record>,
    {
        self.batched(BatchOp::Delete, records, batch_size)
    }

    fn batched<I>(
        &mut self,
        op: BatchOp,
        records: I,
        batch_size: Option<usize>,
    ) -> Result<BatchCursor<'_, E, I::IntoIter>>
    where
        I: IntoIterator<Item = Record>,
    {
        let size = batch_size.unwrap_or(self.ctx.config().batch_size);
        let batches = partition(records, size)?;
        Ok(BatchCursor::new(self, op, batches))
    }

    /// Applies one batch atomically. On failure the batch is rolled back and
    /// handed back as it was passed in.
    pub(crate) fn apply_batch(
        &mut self,
        op: BatchOp,
        batch: Vec<Record>,
    ) -> std::result::Result<(Vec<Record>, u64), (QueryError, Vec<Record>)> {
        let original = batch.clone();
        if let Err(err) = self.executor.savepoint(BATCH_SAVEPOINT) {
            return Err((err.into(), original));
        }
        let applied = self
            .write_batch(op, batch)
            .and_then(|done| match self.executor.release_savepoint(BATCH_SAVEPOINT) {
                Ok(()) => Ok(done),
                Err(err) => Err(err.into()),
            });
        match applied {
            Ok(done) => Ok(done),
            Err(err) => {
                if let Err(rollback) = self.executor.rollback_to_savepoint(BATCH_SAVEPOINT) {
                    warn!(op = ?op, error = %rollback, "batch.savepoint.rollback_failed");
                } else {
                    debug!(op = ?op, rows = original.len(), "batch.savepoint.rolled_back");
                }
                Err((err, original))
            }
        }
    }

    fn write_batch(&mut self, op: BatchOp, mut batch: Vec<Record>) -> Result<(Vec<Record>, u64)> {
        let mut affected = 0;
        match op {
            BatchOp::Insert => {
                self.insert_all(&mut batch)?;
                affected = batch.len() as u64;
            }
            BatchOp::Update => {
                for record in batch.iter_mut() {
                    self.update(record)?;
                    affected += 1;
                }
            }
            BatchOp::Delete => {
                for record in &batch {
                    self.delete(record)?;
                    affected += 1;
                }
            }
        }
        Ok((batch, affected))
    }
}

const BATCH_SAVEPOINT: &str = "quarry_batch";

fn unexpected(message: String) -> QueryError {
    ExecutorError::new(ExecutorErrorKind::Other, message).into()
}
