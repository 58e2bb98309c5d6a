use std::error::Error;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use tokio_postgres::{Client, NoTls};
use tokio_util::bytes;

use super::{Driver, DriverConnection, ExecuteOutcome};
use crate::config::ConnectionTarget;
use crate::error::{ConnectionErrorKind, DbPoolError};
use crate::results::ResultSet;
use crate::translation::PlaceholderStyle;
use crate::types::{DatabaseType, RowValues};

/// `tokio-postgres` driver (no TLS).
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDriver;

#[async_trait]
impl Driver for PostgresDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Postgres
    }

    async fn connect(
        &self,
        target: &ConnectionTarget,
    ) -> Result<Box<dyn DriverConnection>, DbPoolError> {
        let mut cfg = tokio_postgres::Config::new();
        cfg.dbname(&target.database);
        if let Some(host) = &target.host {
            cfg.host(host);
        }
        if let Some(port) = target.effective_port() {
            cfg.port(port);
        }
        if let Some(user) = &target.user {
            cfg.user(user);
        }
        if let Some(password) = &target.password {
            cfg.password(password);
        }

        let (client, connection) = cfg.connect(NoTls).await.map_err(|e| {
            DbPoolError::connection(
                ConnectionErrorKind::Connect,
                format!("postgres connect error: {e}"),
            )
        })?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "postgres connection task ended");
            }
        });
        Ok(Box::new(PostgresConnection {
            client,
            in_transaction: false,
        }))
    }
}

/// One `tokio_postgres::Client`.
pub struct PostgresConnection {
    client: Client,
    in_transaction: bool,
}

impl PostgresConnection {
    fn ensure_open(&self) -> Result<(), DbPoolError> {
        if self.client.is_closed() {
            Err(DbPoolError::connection(
                ConnectionErrorKind::ServerGoneAway,
                "postgres connection is closed",
            ))
        } else {
            Ok(())
        }
    }

    async fn simple(&mut self, sql: &str) -> Result<(), DbPoolError> {
        self.ensure_open()?;
        self.client.batch_execute(sql).await?;
        Ok(())
    }
}

fn as_refs(params: &[RowValues]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

#[async_trait]
impl DriverConnection for PostgresConnection {
    async fn query(&mut self, sql: &str, params: &[RowValues]) -> Result<ResultSet, DbPoolError> {
        self.ensure_open()?;
        let stmt = self.client.prepare(sql).await?;
        let rows = self.client.query(&stmt, &as_refs(params)).await?;

        let column_names: Vec<String> = stmt
            .columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect();
        let mut result_set = ResultSet::with_columns(column_names, rows.len());
        for row in &rows {
            let col_count = row.columns().len();
            let mut row_values = Vec::with_capacity(col_count);
            for idx in 0..col_count {
                row_values.push(postgres_extract_value(row, idx)?);
            }
            result_set.add_row_values(row_values);
        }
        Ok(result_set)
    }

    async fn execute(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ExecuteOutcome, DbPoolError> {
        self.ensure_open()?;
        let rows = self.client.execute(sql, &as_refs(params)).await?;
        Ok(ExecuteOutcome {
            rows_affected: usize::try_from(rows).unwrap_or(usize::MAX),
            last_insert_id: None,
        })
    }

    async fn execute_many(
        &mut self,
        sql: &str,
        param_sets: &[Vec<RowValues>],
    ) -> Result<usize, DbPoolError> {
        self.ensure_open()?;
        let standalone = !self.in_transaction;
        if standalone {
            self.client.batch_execute("BEGIN").await?;
        }
        let result = async {
            let stmt = self.client.prepare(sql).await?;
            let mut total = 0u64;
            for params in param_sets {
                total += self.client.execute(&stmt, &as_refs(params)).await?;
            }
            Ok::<_, DbPoolError>(total)
        }
        .await;
        match result {
            Ok(total) => {
                if standalone {
                    self.client.batch_execute("COMMIT").await?;
                }
                Ok(usize::try_from(total).unwrap_or(usize::MAX))
            }
            Err(e) => {
                if standalone
                    && !self.client.is_closed()
                    && let Err(rollback_err) = self.client.batch_execute("ROLLBACK").await
                {
                    tracing::error!(error = %rollback_err, "rollback of failed batch failed");
                }
                Err(e)
            }
        }
    }

    async fn begin(&mut self) -> Result<(), DbPoolError> {
        self.simple("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbPoolError> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.simple("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), DbPoolError> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.simple("ROLLBACK").await
    }

    async fn last_insert_id(&mut self) -> Result<i64, DbPoolError> {
        self.ensure_open()?;
        let row = self.client.query_one("SELECT lastval()", &[]).await?;
        Ok(row.try_get(0)?)
    }

    async fn ping(&mut self) -> Result<(), DbPoolError> {
        self.simple("SELECT 1").await
    }

    fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

/// Extracts a `RowValues` from a `tokio_postgres` Row at the given index.
///
/// Integer, float, bool, `TIMESTAMP`, `TIMESTAMPTZ` (as UTC), `DATE` (at midnight), JSON and
/// `BYTEA` columns map to their typed variants. Any other column must be readable as text
/// (`TEXT`, `VARCHAR`, `NAME`, ...); cast `NUMERIC` or `UUID` to `text` in the select list.
///
/// # Errors
/// Returns `DbPoolError` if the column cannot be retrieved.
pub fn postgres_extract_value(
    row: &tokio_postgres::Row,
    idx: usize,
) -> Result<RowValues, DbPoolError> {
    let type_info = row.columns()[idx].type_();

    let value = match *type_info {
        Type::INT2 => {
            let val: Option<i16> = row.try_get(idx)?;
            val.map_or(RowValues::Null, |v| RowValues::Int(i64::from(v)))
        }
        Type::INT4 => {
            let val: Option<i32> = row.try_get(idx)?;
            val.map_or(RowValues::Null, |v| RowValues::Int(i64::from(v)))
        }
        Type::INT8 => {
            let val: Option<i64> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Int)
        }
        Type::FLOAT4 => {
            let val: Option<f32> = row.try_get(idx)?;
            val.map_or(RowValues::Null, |v| RowValues::Float(f64::from(v)))
        }
        Type::FLOAT8 => {
            let val: Option<f64> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Float)
        }
        Type::BOOL => {
            let val: Option<bool> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Bool)
        }
        Type::TIMESTAMP => {
            let val: Option<NaiveDateTime> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Timestamp)
        }
        Type::TIMESTAMPTZ => {
            let val: Option<DateTime<Utc>> = row.try_get(idx)?;
            val.map_or(RowValues::Null, |v| RowValues::Timestamp(v.naive_utc()))
        }
        Type::DATE => {
            let val: Option<NaiveDate> = row.try_get(idx)?;
            val.map_or(RowValues::Null, |v| {
                RowValues::Timestamp(NaiveDateTime::from(v))
            })
        }
        Type::JSON | Type::JSONB => {
            let val: Option<Value> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::JSON)
        }
        Type::BYTEA => {
            let val: Option<Vec<u8>> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Blob)
        }
        _ => {
            let val: Option<String> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Text)
        }
    };
    Ok(value)
}

impl ToSql for RowValues {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut bytes::BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            RowValues::Int(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                _ => (*i).to_sql(ty, out),
            },
            RowValues::Float(f) => (*f).to_sql(ty, out),
            RowValues::Text(s) => s.to_sql(ty, out),
            RowValues::Bool(b) => (*b).to_sql(ty, out),
            RowValues::Timestamp(dt) => dt.to_sql(ty, out),
            RowValues::Null => Ok(IsNull::Yes),
            RowValues::JSON(jsval) => jsval.to_sql(ty, out),
            RowValues::Blob(bytes) => bytes.to_sql(ty, out),
        }
    }

    fn accepts(ty: &Type) -> bool {
        matches!(
            *ty,
            Type::INT2
                | Type::INT4
                | Type::INT8
                | Type::FLOAT8
                | Type::TEXT
                | Type::VARCHAR
                | Type::BPCHAR
                | Type::NAME
                | Type::BOOL
                | Type::TIMESTAMP
                | Type::JSON
                | Type::JSONB
                | Type::BYTEA
        )
    }

    to_sql_checked!();
}
