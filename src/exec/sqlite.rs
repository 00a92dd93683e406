//! [`StatementExecutor`] over a `rusqlite` connection.

use std::path::Path;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode};
use time::macros::format_description;
use time::OffsetDateTime;

use crate::error::{ExecutorError, ExecutorErrorKind, QueryError, Result};
use crate::exec::{Row, StatementExecutor};
use crate::value::{BoundParam, SqlType, Value};

/// SQLite executor. Statements are prepared through the connection's cache.
pub struct SqliteExecutor {
    conn: Connection,
}

impl SqliteExecutor {
    /// Opens (or creates) a database file with foreign keys enforced.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(driver_error)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(driver_error)?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(driver_error)?;
        Ok(Self { conn })
    }

    /// Runs a script of semicolon-separated statements without parameters,
    /// e.g. a schema.
    pub fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql).map_err(driver_error)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl StatementExecutor for SqliteExecutor {
    fn execute(&mut self, sql: &str, params: &[BoundParam]) -> std::result::Result<u64, ExecutorError> {
        let values = bind_all(params)?;
        let mut statement = self.conn.prepare_cached(sql).map_err(classify)?;
        let affected = statement
            .execute(params_from_iter(values))
            .map_err(classify)?;
        Ok(affected as u64)
    }

    fn query(
        &mut self,
        sql: &str,
        params: &[BoundParam],
    ) -> std::result::Result<Vec<Row>, ExecutorError> {
        let values = bind_all(params)?;
        let mut statement = self.conn.prepare_cached(sql).map_err(classify)?;
        let width = statement.column_count();
        let mut rows = statement.query(params_from_iter(values)).map_err(classify)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(classify)? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(read_value(row.get_ref(idx).map_err(classify)?));
            }
            out.push(Row::new(values));
        }
        Ok(out)
    }
}

fn bind_all(params: &[BoundParam]) -> std::result::Result<Vec<SqlValue>, ExecutorError> {
    params.iter().map(bind).collect()
}

fn bind(param: &BoundParam) -> std::result::Result<SqlValue, ExecutorError> {
    Ok(match &param.value {
        Value::Null => SqlValue::Null,
        Value::Bool(v) => SqlValue::Integer(i64::from(*v)),
        Value::Int(v) => SqlValue::Integer(*v),
        Value::Float(v) => SqlValue::Real(*v),
        Value::String(v) => SqlValue::Text(v.clone()),
        Value::Bytes(v) => SqlValue::Blob(v.clone()),
        Value::DateTime(nanos) => SqlValue::Text(format_datetime(*nanos, param.hint)?),
    })
}

/// Renders a timestamp in the text form SQLite's date functions accept.
fn format_datetime(nanos: i128, hint: Option<SqlType>) -> std::result::Result<String, ExecutorError> {
    let at = OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .map_err(|err| ExecutorError::with_cause(ExecutorErrorKind::Other, err))?;
    let formatted = match hint {
        Some(SqlType::Date) => at.format(format_description!("[year]-[month]-[day]")),
        Some(SqlType::Time) => at.format(format_description!(
            "[hour]:[minute]:[second].[subsecond digits:3]"
        )),
        _ => at.format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
        )),
    };
    formatted.map_err(|err| ExecutorError::with_cause(ExecutorErrorKind::Other, err))
}

fn read_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    }
}

fn classify(err: rusqlite::Error) -> ExecutorError {
    let kind = match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => ExecutorErrorKind::Constraint,
        _ => ExecutorErrorKind::Other,
    };
    ExecutorError::with_cause(kind, err)
}

fn driver_error(err: rusqlite::Error) -> QueryError {
    classify(err).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_and_reads_back_values() {
        let mut executor = SqliteExecutor::open_in_memory().expect("in-memory db");
        executor
            .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, at TEXT, ok INTEGER)")
            .expect("schema");
        let affected = executor
            .execute(
                "INSERT INTO t (name, at, ok) VALUES (?, ?, ?)",
                &[
                    BoundParam::new("Leo"),
                    BoundParam::typed(Value::DateTime(86_400_000_000_000), SqlType::Date),
                    BoundParam::new(true),
                ],
            )
            .expect("insert");
        assert_eq!(affected, 1);
        let rows = executor
            .query("SELECT id, name, at, ok FROM t", &[])
            .expect("select");
        assert_eq!(
            rows,
            [Row::new(vec![
                Value::Int(1),
                Value::from("Leo"),
                Value::from("1970-01-02"),
                Value::Int(1),
            ])]
        );
    }

    #[test]
    fn constraint_failures_are_classified() {
        let mut executor = SqliteExecutor::open_in_memory().expect("in-memory db");
        executor
            .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE)")
            .expect("schema");
        executor
            .execute("INSERT INTO t (name) VALUES (?)", &[BoundParam::new("a")])
            .expect("first insert");
        let err = executor
            .execute("INSERT INTO t (name) VALUES (?)", &[BoundParam::new("a")])
            .unwrap_err();
        assert_eq!(err.kind, ExecutorErrorKind::Constraint);
        let err = executor.execute("SELEC 1", &[]).unwrap_err();
        assert_eq!(err.kind, ExecutorErrorKind::Other);
    }
}
