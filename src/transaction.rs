use crate::error::DbPoolError;
use crate::executor::{ExecutionCore, Lease, ScopeClaim, ScopeFuture};
use crate::results::{ResultSet, Row};
use crate::session::Session;
use crate::types::RowValues;

/// Lifecycle of a [`TransactionScope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Created,
    Active,
    Committed,
    RolledBack,
}

/// Decides whether a unit of work's successful value lets the transaction commit.
///
/// `false` and [`Outcome::Rollback`] roll back; every other value commits.
pub trait CommitIntent {
    fn should_commit(&self) -> bool {
        true
    }
}

impl CommitIntent for bool {
    fn should_commit(&self) -> bool {
        *self
    }
}

impl CommitIntent for () {}
impl CommitIntent for i64 {}
impl CommitIntent for u64 {}
impl CommitIntent for usize {}
impl CommitIntent for String {}
impl CommitIntent for ResultSet {}
impl CommitIntent for Row {}
impl<T> CommitIntent for Option<T> {}
impl<T> CommitIntent for Vec<T> {}

/// A value paired with an explicit commit decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Commit(T),
    Rollback(T),
}

impl<T> Outcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            Outcome::Commit(value) | Outcome::Rollback(value) => value,
        }
    }
}

impl<T> CommitIntent for Outcome<T> {
    fn should_commit(&self) -> bool {
        matches!(self, Outcome::Commit(_))
    }
}

/// One database transaction on a dedicated session.
///
/// Created by [`ExecutionCore::transaction`], entered with [`begin`](Self::begin), closed with
/// [`finish`](Self::finish). Statements issued through the scope never auto-commit and are never
/// retried. A scope dropped while active rolls back in the background.
pub struct TransactionScope<'c> {
    core: &'c ExecutionCore,
    state: ScopeState,
    should_commit: bool,
    // Field order matters: the lease must be released before the claim.
    lease: Option<Lease>,
    claim: Option<ScopeClaim>,
}

impl<'c> TransactionScope<'c> {
    pub(crate) fn new(core: &'c ExecutionCore) -> Self {
        Self {
            core,
            state: ScopeState::Created,
            should_commit: true,
            lease: None,
            claim: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> ScopeState {
        self.state
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == ScopeState::Active
    }

    /// Whether [`finish`](Self::finish) would commit right now.
    #[must_use]
    pub fn should_commit(&self) -> bool {
        self.should_commit
    }

    /// Check out a session and open the transaction.
    ///
    /// # Errors
    /// Returns [`DbPoolError::UsageError`] if the scope was already entered or another scope owns
    /// the core's single connection; otherwise any checkout or `BEGIN` failure.
    pub async fn begin(&mut self) -> Result<(), DbPoolError> {
        if self.state != ScopeState::Created {
            return Err(DbPoolError::usage(format!(
                "transaction scope cannot be entered from state {:?}",
                self.state
            )));
        }
        let (mut lease, claim) = self.core.scope_lease().await?;
        lease.begin().await?;
        self.core.logger().transaction("begin");
        self.lease = Some(lease);
        self.claim = claim;
        self.state = ScopeState::Active;
        Ok(())
    }

    /// Run a unit of work inside the active transaction.
    ///
    /// A failure from `work` marks the scope rollback-only and is returned unchanged. A value
    /// whose [`CommitIntent`] says no marks the scope rollback-only and is returned as `Ok`.
    ///
    /// # Errors
    /// Returns [`DbPoolError::UsageError`] without touching the database if the scope is not
    /// active; otherwise whatever `work` returns.
    pub async fn run<T, E, F>(&mut self, work: F) -> Result<T, E>
    where
        F: for<'s> FnOnce(&'s mut TransactionScope<'c>) -> ScopeFuture<'s, Result<T, E>>,
        T: CommitIntent,
        E: From<DbPoolError>,
    {
        if self.state != ScopeState::Active {
            return Err(E::from(DbPoolError::usage(format!(
                "transaction scope is not active (state {:?})",
                self.state
            ))));
        }
        let result = work(&mut *self).await;
        match &result {
            Ok(value) if !value.should_commit() => self.set_rollback_only(),
            Ok(_) => {}
            Err(_) => self.should_commit = false,
        }
        result
    }

    /// Make [`finish`](Self::finish) roll back regardless of what happens next.
    pub fn set_rollback_only(&mut self) {
        if self.should_commit {
            self.core.logger().transaction("rollback_only");
        }
        self.should_commit = false;
    }

    /// Commit or roll back, then release the session. A scope that was never entered finishes
    /// without any I/O.
    ///
    /// # Errors
    /// Returns `DbPoolError` if `COMMIT` or `ROLLBACK` fails. The session is released either way.
    pub async fn finish(mut self) -> Result<(), DbPoolError> {
        let Some(mut lease) = self.lease.take() else {
            return Ok(());
        };
        let log = self.core.logger();
        let result = if self.should_commit {
            self.state = ScopeState::Committed;
            log.transaction("commit");
            lease.commit().await
        } else {
            self.state = ScopeState::RolledBack;
            log.transaction("rollback");
            lease.rollback().await
        };
        drop(lease);
        self.claim = None;
        result
    }

    /// # Errors
    /// Returns `DbPoolError` if the scope is not active or the statement fails.
    pub async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, DbPoolError> {
        let core = self.core;
        let session = self.session()?;
        core.query_on(session, "fetch_all", sql, params).await
    }

    /// # Errors
    /// Returns `DbPoolError` if the scope is not active or the statement fails.
    pub async fn fetch_one(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<Option<Row>, DbPoolError> {
        let core = self.core;
        let session = self.session()?;
        let rows = core.query_on(session, "fetch_one", sql, params).await?;
        Ok(rows.into_first())
    }

    /// # Errors
    /// Returns `DbPoolError` if the scope is not active or the statement fails.
    pub async fn execute(&mut self, sql: &str, params: &[RowValues]) -> Result<usize, DbPoolError> {
        let core = self.core;
        let session = self.session()?;
        let outcome = core.execute_on(session, "execute", sql, params).await?;
        Ok(outcome.rows_affected)
    }

    /// # Errors
    /// Returns `DbPoolError` if the scope is not active or the statement fails.
    pub async fn execute_returning_id(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<i64, DbPoolError> {
        let core = self.core;
        let session = self.session()?;
        core.execute_returning_id_on(session, sql, params).await
    }

    /// # Errors
    /// Returns `DbPoolError` if the scope is not active or the batch fails.
    pub async fn execute_many(
        &mut self,
        sql: &str,
        param_sets: &[Vec<RowValues>],
    ) -> Result<usize, DbPoolError> {
        let core = self.core;
        let session = self.session()?;
        core.execute_many_on(session, sql, param_sets).await
    }

    /// Last id generated on this scope's session.
    ///
    /// # Errors
    /// Returns `DbPoolError` if the scope is not active or the query fails.
    pub async fn last_insert_id(&mut self) -> Result<i64, DbPoolError> {
        let core = self.core;
        let session = self.session()?;
        core.last_insert_id_on(session).await
    }

    fn session(&mut self) -> Result<&mut Session, DbPoolError> {
        if self.state != ScopeState::Active {
            return Err(DbPoolError::usage(format!(
                "transaction scope is not active (state {:?})",
                self.state
            )));
        }
        self.lease
            .as_deref_mut()
            .ok_or_else(|| DbPoolError::usage("transaction scope has no session"))
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        let Some(mut lease) = self.lease.take() else {
            return;
        };
        let claim = self.claim.take();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            tracing::warn!("transaction scope dropped while active; rolling back");
            handle.spawn(async move {
                if let Err(err) = lease.rollback().await {
                    tracing::error!(error = %err, "background rollback failed");
                }
                drop(lease);
                drop(claim);
            });
        } else {
            // Released still inside its transaction: the pool evicts it and the single variant
            // reconnects on next use.
            drop(lease);
            drop(claim);
        }
    }
}
