//! Resilient database access for `SQLite` and `PostgreSQL`.
//!
//! [`Factory::create`] returns an [`ExecutionCore`] that either owns one persistent connection or
//! shares a bb8 pool per connection target. Reads outside a transaction are retried when the
//! server drops the connection; writes run once. [`TransactionScope`] wraps a unit of work in
//! `BEGIN`/`COMMIT` and rolls back on failure or on an explicit rollback signal.
//!
//! ```rust,no_run
//! use dbpool_middleware::prelude::*;
//!
//! # async fn demo() -> Result<(), DbPoolError> {
//! let target = ConnectionTarget::sqlite("/tmp/app.db");
//! let core = Factory::create(&target, FactoryOptions::pooled()).await?;
//!
//! core.execute("CREATE TABLE IF NOT EXISTS t (id INTEGER PRIMARY KEY, name TEXT)", &[]).await?;
//! core.execute_many(
//!     "INSERT INTO t (name) VALUES (?1)",
//!     &[vec!["alice".into()], vec!["bob".into()]],
//! )
//! .await?;
//! let rows = core.fetch_all("SELECT id, name FROM t ORDER BY id", &[]).await?;
//! assert_eq!(rows.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod prelude;

pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod factory;
mod logging;
pub mod pool;
pub mod results;
pub mod retry;
pub mod session;
pub mod transaction;
pub mod translation;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{ConnectionTarget, FactoryOptions, TargetKey};
pub use driver::{Driver, DriverConnection, ExecuteOutcome, driver_for};
pub use error::{ConnectionErrorKind, DbPoolError};
pub use executor::{ExecutionCore, ScopeFuture};
pub use factory::Factory;
pub use pool::PoolRegistry;
pub use results::{ResultSet, Row};
pub use retry::RetryPolicy;
pub use transaction::{CommitIntent, Outcome, ScopeState, TransactionScope};
pub use translation::{PlaceholderStyle, translate_placeholders};
pub use types::{DatabaseType, RowValues};
