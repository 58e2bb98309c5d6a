use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{Statement, ToSql};
use tokio::sync::Mutex;

use super::{Driver, DriverConnection, ExecuteOutcome};
use crate::config::ConnectionTarget;
use crate::error::{ConnectionErrorKind, DbPoolError};
use crate::results::ResultSet;
use crate::translation::PlaceholderStyle;
use crate::types::{DatabaseType, RowValues};

type SharedSqliteConnection = Arc<Mutex<rusqlite::Connection>>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// `rusqlite`-backed driver. The target's `database` field is the file path.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDriver;

#[async_trait]
impl Driver for SqliteDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Sqlite
    }

    async fn connect(
        &self,
        target: &ConnectionTarget,
    ) -> Result<Box<dyn DriverConnection>, DbPoolError> {
        let path = target.database.clone();
        let conn = tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&path).map_err(|e| {
                DbPoolError::connection(
                    ConnectionErrorKind::Connect,
                    format!("failed to open sqlite database {path}: {e}"),
                )
            })?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            Ok::<_, DbPoolError>(conn)
        })
        .await
        .map_err(|e| {
            DbPoolError::connection(
                ConnectionErrorKind::Connect,
                format!("sqlite connect join error: {e}"),
            )
        })??;
        Ok(Box::new(SqliteConnection {
            conn: Arc::new(Mutex::new(conn)),
        }))
    }
}

/// One `rusqlite` connection; blocking calls run on the blocking pool.
pub struct SqliteConnection {
    conn: SharedSqliteConnection,
}

impl SqliteConnection {
    async fn run<F, R>(&self, func: F) -> Result<R, DbPoolError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R, DbPoolError> + Send + 'static,
        R: Send + 'static,
    {
        run_blocking(Arc::clone(&self.conn), func).await
    }
}

#[async_trait]
impl DriverConnection for SqliteConnection {
    async fn query(&mut self, sql: &str, params: &[RowValues]) -> Result<ResultSet, DbPoolError> {
        let sql_owned = sql.to_owned();
        let params_owned = convert_params(params);
        self.run(move |conn| {
            let mut stmt = conn.prepare(&sql_owned)?;
            build_result_set(&mut stmt, &params_owned)
        })
        .await
    }

    async fn execute(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ExecuteOutcome, DbPoolError> {
        let sql_owned = sql.to_owned();
        let params_owned = convert_params(params);
        self.run(move |conn| {
            let rows_affected = {
                let mut stmt = conn.prepare(&sql_owned)?;
                stmt.execute(rusqlite::params_from_iter(params_owned.iter()))?
            };
            Ok(ExecuteOutcome {
                rows_affected,
                last_insert_id: Some(conn.last_insert_rowid()),
            })
        })
        .await
    }

    async fn execute_many(
        &mut self,
        sql: &str,
        param_sets: &[Vec<RowValues>],
    ) -> Result<usize, DbPoolError> {
        let sql_owned = sql.to_owned();
        let sets: Vec<Vec<Value>> = param_sets.iter().map(|p| convert_params(p)).collect();
        self.run(move |conn| {
            // Outside BEGIN each statement would commit on its own; group the batch instead.
            if conn.is_autocommit() {
                let tx = conn.transaction()?;
                let total = execute_each(&tx, &sql_owned, &sets)?;
                tx.commit()?;
                Ok(total)
            } else {
                execute_each(conn, &sql_owned, &sets)
            }
        })
        .await
    }

    async fn begin(&mut self) -> Result<(), DbPoolError> {
        self.run(|conn| conn.execute_batch("BEGIN").map_err(DbPoolError::from))
            .await
    }

    async fn commit(&mut self) -> Result<(), DbPoolError> {
        self.run(|conn| {
            if conn.is_autocommit() {
                return Ok(());
            }
            conn.execute_batch("COMMIT").map_err(DbPoolError::from)
        })
        .await
    }

    async fn rollback(&mut self) -> Result<(), DbPoolError> {
        self.run(|conn| {
            if conn.is_autocommit() {
                return Ok(());
            }
            conn.execute_batch("ROLLBACK").map_err(DbPoolError::from)
        })
        .await
    }

    async fn last_insert_id(&mut self) -> Result<i64, DbPoolError> {
        self.run(|conn| {
            conn.query_row("SELECT last_insert_rowid()", [], |row| row.get(0))
                .map_err(DbPoolError::from)
        })
        .await
    }

    async fn ping(&mut self) -> Result<(), DbPoolError> {
        self.run(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(DbPoolError::from)
        })
        .await
    }

    fn is_closed(&self) -> bool {
        false
    }
}

fn execute_each(
    conn: &rusqlite::Connection,
    sql: &str,
    sets: &[Vec<Value>],
) -> Result<usize, DbPoolError> {
    let mut stmt = conn.prepare(sql)?;
    let mut total = 0;
    for params in sets {
        total += stmt.execute(rusqlite::params_from_iter(params.iter()))?;
    }
    Ok(total)
}

async fn run_blocking<F, R>(conn: SharedSqliteConnection, func: F) -> Result<R, DbPoolError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, DbPoolError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard)
    })
    .await
    .map_err(|e| DbPoolError::query(None, format!("sqlite spawn_blocking join error: {e}")))?
}

/// Convert a single `RowValues` to a rusqlite `Value`.
#[must_use]
pub fn row_value_to_sqlite_value(value: &RowValues) -> Value {
    match value {
        RowValues::Int(i) => Value::Integer(*i),
        RowValues::Float(f) => Value::Real(*f),
        RowValues::Text(s) => Value::Text(s.clone()),
        RowValues::Bool(b) => Value::Integer(i64::from(*b)),
        RowValues::Timestamp(dt) => {
            let mut text = String::with_capacity(32);
            let _ = write!(text, "{}", dt.format("%F %T%.f"));
            Value::Text(text)
        }
        RowValues::Null => Value::Null,
        RowValues::JSON(jval) => Value::Text(jval.to_string()),
        RowValues::Blob(bytes) => Value::Blob(bytes.clone()),
    }
}

fn convert_params(params: &[RowValues]) -> Vec<Value> {
    params.iter().map(row_value_to_sqlite_value).collect()
}

fn sqlite_extract_value(row: &rusqlite::Row, idx: usize) -> Result<RowValues, DbPoolError> {
    let value: Value = row.get(idx)?;
    Ok(match value {
        Value::Null => RowValues::Null,
        Value::Integer(i) => RowValues::Int(i),
        Value::Real(f) => RowValues::Float(f),
        Value::Text(s) => RowValues::Text(s),
        Value::Blob(b) => RowValues::Blob(b),
    })
}

/// Run a prepared statement and collect every row.
fn build_result_set(stmt: &mut Statement, params: &[Value]) -> Result<ResultSet, DbPoolError> {
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|v| v as &dyn ToSql).collect();
    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let col_count = column_names.len();

    let mut result_set = ResultSet::with_columns(column_names, 10);
    let mut rows_iter = stmt.query(&param_refs[..])?;
    while let Some(row) = rows_iter.next()? {
        let mut row_values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            row_values.push(sqlite_extract_value(row, i)?);
        }
        result_set.add_row_values(row_values);
    }

    Ok(result_set)
}
