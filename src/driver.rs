//! Driver seam: the primitives this crate needs from a database client library.
//!
//! Drivers report connection loss through [`ConnectionErrorKind::ServerGoneAway`] and
//! [`ConnectionErrorKind::LostDuringQuery`]; every other failure is a query error.
//!
//! [`ConnectionErrorKind::ServerGoneAway`]: crate::error::ConnectionErrorKind::ServerGoneAway
//! [`ConnectionErrorKind::LostDuringQuery`]: crate::error::ConnectionErrorKind::LostDuringQuery

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ConnectionTarget;
use crate::error::DbPoolError;
use crate::results::ResultSet;
use crate::translation::PlaceholderStyle;
use crate::types::{DatabaseType, RowValues};

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// What a single mutating statement reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecuteOutcome {
    pub rows_affected: usize,
    /// Identifier generated by the statement, when the driver reports one directly.
    pub last_insert_id: Option<i64>,
}

/// Opens connections for one backend.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    fn database_type(&self) -> DatabaseType;

    fn placeholder_style(&self) -> PlaceholderStyle;

    /// Open a new physical connection with auto-commit semantics outside `begin`.
    async fn connect(
        &self,
        target: &ConnectionTarget,
    ) -> Result<Box<dyn DriverConnection>, DbPoolError>;
}

/// One physical connection. Statements are sent in already-translated placeholder style.
#[async_trait]
pub trait DriverConnection: Send {
    /// Run a statement that returns rows.
    async fn query(&mut self, sql: &str, params: &[RowValues]) -> Result<ResultSet, DbPoolError>;

    /// Run one mutating statement.
    async fn execute(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ExecuteOutcome, DbPoolError>;

    /// Run one statement once per parameter set; returns the summed row count.
    async fn execute_many(
        &mut self,
        sql: &str,
        param_sets: &[Vec<RowValues>],
    ) -> Result<usize, DbPoolError>;

    async fn begin(&mut self) -> Result<(), DbPoolError>;

    /// Commit pending work. A no-op when no transaction is open.
    async fn commit(&mut self) -> Result<(), DbPoolError>;

    /// Roll back pending work. A no-op when no transaction is open.
    async fn rollback(&mut self) -> Result<(), DbPoolError>;

    /// Dedicated "last insert id" query on this session.
    async fn last_insert_id(&mut self) -> Result<i64, DbPoolError>;

    /// Cheap liveness probe.
    async fn ping(&mut self) -> Result<(), DbPoolError>;

    /// True once the driver knows the session is dead.
    fn is_closed(&self) -> bool;
}

/// Driver for a backend kind, if it was compiled in.
///
/// # Errors
/// Returns [`DbPoolError::ConfigurationError`] when the backend's cargo feature is disabled.
pub fn driver_for(backend: DatabaseType) -> Result<Arc<dyn Driver>, DbPoolError> {
    match backend {
        #[cfg(feature = "sqlite")]
        DatabaseType::Sqlite => Ok(Arc::new(sqlite::SqliteDriver)),
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => Ok(Arc::new(postgres::PostgresDriver)),
        #[allow(unreachable_patterns)]
        other => Err(DbPoolError::configuration(format!(
            "{other:?} support is not enabled in this build"
        ))),
    }
}
