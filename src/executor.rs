//! The execution core: fetch/execute operations over either one persistent connection or a
//! bb8 pool.
//!
//! Reads outside a transaction go through the core's [`RetryPolicy`]; writes run exactly once.
//! On the single-connection variant all callers share one session, serialized by an async mutex,
//! and a lost session is replaced on the next operation.

mod lease;
mod ops;

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, OwnedMappedMutexGuard, OwnedMutexGuard};

use crate::config::{ConnectionTarget, FactoryOptions};
use crate::driver::Driver;
use crate::error::{ConnectionErrorKind, DbPoolError};
use crate::logging::SqlLogger;
use crate::pool::{SessionManager, SessionPool};
use crate::results::{ResultSet, Row};
use crate::retry::RetryPolicy;
use crate::session::Session;
use crate::transaction::{CommitIntent, TransactionScope};
use crate::translation::{PlaceholderStyle, translate_placeholders};
use crate::types::{DatabaseType, RowValues};

pub(crate) use lease::{Lease, ScopeClaim};

/// Boxed future returned by a unit of work passed to
/// [`ExecutionCore::transaction_scope`] or [`TransactionScope::run`].
pub type ScopeFuture<'s, T> = Pin<Box<dyn Future<Output = T> + Send + 's>>;

enum Provider {
    Single {
        slot: Arc<Mutex<Option<Session>>>,
        scope_active: Arc<AtomicBool>,
    },
    Pooled {
        pool: SessionPool,
    },
}

/// Runs SQL against one connection target.
///
/// Obtain one through [`Factory::create`](crate::factory::Factory::create). Pooled cores are
/// shared per target, so treat the returned `Arc` as the handle.
pub struct ExecutionCore {
    provider: Provider,
    driver: Arc<dyn Driver>,
    target: ConnectionTarget,
    style: PlaceholderStyle,
    log: SqlLogger,
    retry: RetryPolicy,
}

impl ExecutionCore {
    /// Open the single persistent connection eagerly.
    pub(crate) async fn new_single(
        driver: Arc<dyn Driver>,
        target: ConnectionTarget,
        options: FactoryOptions,
    ) -> Result<Self, DbPoolError> {
        target.validate()?;
        let conn = driver.connect(&target).await?;
        tracing::debug!(target_key = ?target.key(), "opened single connection");
        Ok(Self::assemble(
            Provider::Single {
                slot: Arc::new(Mutex::new(Some(Session::new(conn)))),
                scope_active: Arc::new(AtomicBool::new(false)),
            },
            driver,
            target,
            &options,
        ))
    }

    /// Build a lazily-filled pool sized from the target.
    pub(crate) async fn new_pooled(
        driver: Arc<dyn Driver>,
        target: ConnectionTarget,
        options: FactoryOptions,
    ) -> Result<Self, DbPoolError> {
        target.validate_pooled()?;
        let pool = SessionManager::new(Arc::clone(&driver), target.clone(), options.max_usage)
            .build_pool(options.checkout_timeout)
            .await?;
        Ok(Self::assemble(
            Provider::Pooled { pool },
            driver,
            target,
            &options,
        ))
    }

    fn assemble(
        provider: Provider,
        driver: Arc<dyn Driver>,
        target: ConnectionTarget,
        options: &FactoryOptions,
    ) -> Self {
        let style = driver.placeholder_style();
        let log = SqlLogger::new(options.log_enabled, target.log_identity());
        Self {
            provider,
            driver,
            target,
            style,
            log,
            retry: options.retry,
        }
    }

    #[must_use]
    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    #[must_use]
    pub fn database_type(&self) -> DatabaseType {
        self.driver.database_type()
    }

    #[must_use]
    pub fn is_pooled(&self) -> bool {
        matches!(self.provider, Provider::Pooled { .. })
    }

    #[must_use]
    pub fn log_enabled(&self) -> bool {
        self.log.enabled()
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// True while a transaction scope owns this core's single connection.
    ///
    /// Pooled cores never report a transaction: every scope holds its own checkout.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        match &self.provider {
            Provider::Single { scope_active, .. } => scope_active.load(Ordering::Acquire),
            Provider::Pooled { .. } => false,
        }
    }

    /// All rows produced by `sql`, retried on transient connection loss.
    ///
    /// # Errors
    /// Returns `DbPoolError` if the statement fails, the retry budget runs out, or a transaction
    /// scope currently owns the single connection.
    pub async fn fetch_all(
        &self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, DbPoolError> {
        self.ensure_no_scope()?;
        let this = self;
        self.retry
            .run("fetch_all", &self.log, move || async move {
                let mut lease = this.lease().await?;
                this.query_on(&mut lease, "fetch_all", sql, params).await
            })
            .await
    }

    /// First row produced by `sql`, if any. Retried like [`fetch_all`](Self::fetch_all).
    ///
    /// # Errors
    /// Same as [`fetch_all`](Self::fetch_all).
    pub async fn fetch_one(
        &self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<Option<Row>, DbPoolError> {
        self.ensure_no_scope()?;
        let this = self;
        self.retry
            .run("fetch_one", &self.log, move || async move {
                let mut lease = this.lease().await?;
                let rows = this.query_on(&mut lease, "fetch_one", sql, params).await?;
                Ok(rows.into_first())
            })
            .await
    }

    /// Run one mutating statement and commit it. Returns the affected row count.
    ///
    /// # Errors
    /// Returns `DbPoolError` on any failure; the statement is never retried.
    pub async fn execute(&self, sql: &str, params: &[RowValues]) -> Result<usize, DbPoolError> {
        self.ensure_no_scope()?;
        let mut lease = self.lease().await?;
        let outcome = self.execute_on(&mut lease, "execute", sql, params).await?;
        Ok(outcome.rows_affected)
    }

    /// Run one insert and commit it. Returns the id it generated, read on the same session.
    ///
    /// # Errors
    /// Returns `DbPoolError` on any failure; the statement is never retried.
    pub async fn execute_returning_id(
        &self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<i64, DbPoolError> {
        self.ensure_no_scope()?;
        let mut lease = self.lease().await?;
        self.execute_returning_id_on(&mut lease, sql, params).await
    }

    /// Run `sql` once per parameter set as one batch and commit it. Returns the summed row count.
    ///
    /// # Errors
    /// Returns `DbPoolError` on any failure; the batch is never retried.
    pub async fn execute_many(
        &self,
        sql: &str,
        param_sets: &[Vec<RowValues>],
    ) -> Result<usize, DbPoolError> {
        self.ensure_no_scope()?;
        let mut lease = self.lease().await?;
        self.execute_many_on(&mut lease, sql, param_sets).await
    }

    /// Last id generated on the single connection.
    ///
    /// # Errors
    /// Returns [`DbPoolError::UsageError`] on a pooled core, where no session outlives a call;
    /// use [`TransactionScope::last_insert_id`] or [`execute_returning_id`](Self::execute_returning_id)
    /// there.
    pub async fn last_insert_id(&self) -> Result<i64, DbPoolError> {
        if self.is_pooled() {
            return Err(DbPoolError::usage(
                "last_insert_id on a pooled core needs a transaction scope or execute_returning_id",
            ));
        }
        self.ensure_no_scope()?;
        let mut lease = self.lease().await?;
        self.last_insert_id_on(&mut lease).await
    }

    /// A transaction scope bound to this core, not yet begun.
    #[must_use]
    pub fn transaction(&self) -> TransactionScope<'_> {
        TransactionScope::new(self)
    }

    /// Begin a scope, run `work` in it, then commit or roll back.
    ///
    /// `work` rolls the transaction back by failing, by returning `false` or
    /// [`Outcome::Rollback`](crate::transaction::Outcome::Rollback), or by calling
    /// [`TransactionScope::set_rollback_only`]. A failure from `work` is returned as is, after the
    /// rollback.
    ///
    /// ```rust,no_run
    /// use dbpool_middleware::prelude::*;
    ///
    /// # async fn demo(core: &ExecutionCore) -> Result<(), DbPoolError> {
    /// let moved = core
    ///     .transaction_scope(|tx| {
    ///         Box::pin(async move {
    ///             let n = tx
    ///                 .execute("UPDATE accounts SET owner = ?1 WHERE id = ?2", &["bob".into(), RowValues::Int(7)])
    ///                 .await?;
    ///             Ok::<_, DbPoolError>(n == 1)
    ///         })
    ///     })
    ///     .await?;
    /// # let _ = moved;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    /// Returns the error from `work`, or a `DbPoolError` raised while beginning or finishing.
    pub async fn transaction_scope<'c, T, E, F>(&'c self, work: F) -> Result<T, E>
    where
        F: for<'s> FnOnce(&'s mut TransactionScope<'c>) -> ScopeFuture<'s, Result<T, E>>,
        T: CommitIntent,
        E: From<DbPoolError>,
    {
        let mut scope = self.transaction();
        scope.begin().await?;
        let result = scope.run(work).await;
        let finished = scope.finish().await;
        match (result, finished) {
            (Err(work_err), _) => Err(work_err),
            (Ok(_), Err(finish_err)) => Err(E::from(finish_err)),
            (Ok(value), Ok(())) => Ok(value),
        }
    }

    pub(crate) fn logger(&self) -> &SqlLogger {
        &self.log
    }

    pub(crate) fn prepare<'a>(&self, sql: &'a str) -> Cow<'a, str> {
        translate_placeholders(sql, self.style, self.target.translate_placeholders)
    }

    fn ensure_no_scope(&self) -> Result<(), DbPoolError> {
        if self.in_transaction() {
            return Err(DbPoolError::usage(
                "single connection is owned by an active transaction scope; run statements through the scope",
            ));
        }
        Ok(())
    }

    /// Check out a session for one operation.
    pub(crate) async fn lease(&self) -> Result<Lease, DbPoolError> {
        let mut lease = match &self.provider {
            Provider::Single { slot, .. } => Lease::Single(self.single_session(slot).await?),
            Provider::Pooled { pool } => Lease::Pooled(pool.get_owned().await?),
        };
        lease.mark_used();
        Ok(lease)
    }

    /// Check out a session for a transaction scope. On the single variant this also claims the
    /// core so a second scope fails instead of waiting on the connection forever.
    pub(crate) async fn scope_lease(&self) -> Result<(Lease, Option<ScopeClaim>), DbPoolError> {
        let claim = match &self.provider {
            Provider::Single { scope_active, .. } => Some(ScopeClaim::acquire(scope_active)?),
            Provider::Pooled { .. } => None,
        };
        let lease = self.lease().await?;
        Ok((lease, claim))
    }

    async fn single_session(
        &self,
        slot: &Arc<Mutex<Option<Session>>>,
    ) -> Result<OwnedMappedMutexGuard<Option<Session>, Session>, DbPoolError> {
        let mut guard = Arc::clone(slot).lock_owned().await;
        // A session left inside a transaction was abandoned by a scope that could not roll back.
        let stale = guard
            .as_ref()
            .is_none_or(|session| session.is_broken() || session.in_transaction());
        if stale {
            if guard.take().is_some() {
                tracing::warn!(target_key = ?self.target.key(), "replacing lost single connection");
            }
            let conn = self.driver.connect(&self.target).await?;
            *guard = Some(Session::new(conn));
        }
        OwnedMutexGuard::try_map(guard, Option::as_mut).map_err(|_| {
            DbPoolError::connection(ConnectionErrorKind::Connect, "single connection is not open")
        })
    }
}

impl fmt::Debug for ExecutionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionCore")
            .field("target", &self.target)
            .field("pooled", &self.is_pooled())
            .field("in_transaction", &self.in_transaction())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
