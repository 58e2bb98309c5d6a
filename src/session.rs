use std::fmt;

use crate::driver::{DriverConnection, ExecuteOutcome};
use crate::error::DbPoolError;
use crate::results::ResultSet;
use crate::types::RowValues;

/// A physical connection plus the bookkeeping the execution layer needs around it.
///
/// `in_transaction` suppresses auto-commit; `broken` is latched when the driver reports a
/// connection-loss error so the owner can replace the connection.
pub struct Session {
    conn: Box<dyn DriverConnection>,
    in_transaction: bool,
    broken: bool,
    usage: u32,
}

impl Session {
    pub(crate) fn new(conn: Box<dyn DriverConnection>) -> Self {
        Self {
            conn,
            in_transaction: false,
            broken: false,
            usage: 0,
        }
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken || self.conn.is_closed()
    }

    /// Number of checkouts served so far.
    #[must_use]
    pub fn usage(&self) -> u32 {
        self.usage
    }

    pub(crate) fn mark_used(&mut self) {
        self.usage = self.usage.saturating_add(1);
    }

    fn track<T>(&mut self, result: Result<T, DbPoolError>) -> Result<T, DbPoolError> {
        if let Err(e) = &result
            && e.is_connection_lost()
        {
            self.broken = true;
        }
        result
    }

    pub(crate) async fn query(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, DbPoolError> {
        let result = self.conn.query(sql, params).await;
        self.track(result)
    }

    pub(crate) async fn execute(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ExecuteOutcome, DbPoolError> {
        let result = self.conn.execute(sql, params).await;
        self.track(result)
    }

    pub(crate) async fn execute_many(
        &mut self,
        sql: &str,
        param_sets: &[Vec<RowValues>],
    ) -> Result<usize, DbPoolError> {
        let result = self.conn.execute_many(sql, param_sets).await;
        self.track(result)
    }

    pub(crate) async fn begin(&mut self) -> Result<(), DbPoolError> {
        if self.in_transaction {
            return Err(DbPoolError::usage(
                "transaction already in progress on this connection",
            ));
        }
        let result = self.conn.begin().await;
        self.track(result)?;
        self.in_transaction = true;
        Ok(())
    }

    /// Commit pending work. Clears `in_transaction` even when the commit fails.
    ///
    /// A failed commit is followed by a best-effort rollback and the session is marked broken, so
    /// the open driver-side transaction can never be committed by a later auto-commit.
    pub(crate) async fn commit(&mut self) -> Result<(), DbPoolError> {
        let was_open = self.in_transaction;
        self.in_transaction = false;
        let result = self.conn.commit().await;
        if result.is_err() {
            if was_open && let Err(err) = self.conn.rollback().await {
                tracing::error!(error = %err, "rollback after failed commit failed");
            }
            self.broken = true;
        }
        result
    }

    /// Roll back pending work. Clears `in_transaction` even when the rollback fails.
    pub(crate) async fn rollback(&mut self) -> Result<(), DbPoolError> {
        self.in_transaction = false;
        let result = self.conn.rollback().await;
        if result.is_err() {
            // Unknown transaction state; never hand this connection out again.
            self.broken = true;
        }
        result
    }

    pub(crate) async fn last_insert_id(&mut self) -> Result<i64, DbPoolError> {
        let result = self.conn.last_insert_id().await;
        self.track(result)
    }

    pub(crate) async fn ping(&mut self) -> Result<(), DbPoolError> {
        let result = self.conn.ping().await;
        self.track(result)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("in_transaction", &self.in_transaction)
            .field("broken", &self.broken)
            .field("usage", &self.usage)
            .finish_non_exhaustive()
    }
}
