use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::DbPoolError;
use crate::types::RowValues;

/// Statement-level `tracing` events, gated by the core's logging flag.
///
/// Every event carries `db_user` so output from several targets can be told apart.
#[derive(Debug, Clone)]
pub(crate) struct SqlLogger {
    enabled: bool,
    db_user: Arc<str>,
}

impl SqlLogger {
    pub(crate) fn new(enabled: bool, db_user: &str) -> Self {
        Self {
            enabled,
            db_user: Arc::from(db_user),
        }
    }

    pub(crate) fn enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn statement(&self, op: &'static str, sql: &str, params: &[RowValues]) {
        if self.enabled {
            info!(db_user = %self.db_user, op, sql, args = ?params, "executing sql");
        }
    }

    pub(crate) fn batch(&self, op: &'static str, sql: &str, param_sets: &[Vec<RowValues>]) {
        if self.enabled {
            info!(
                db_user = %self.db_user,
                op,
                sql,
                batch_len = param_sets.len(),
                args = ?param_sets,
                "executing sql batch"
            );
        }
    }

    pub(crate) fn rows(&self, op: &'static str, rows: usize) {
        if self.enabled {
            info!(db_user = %self.db_user, op, rows, "query result");
        }
    }

    pub(crate) fn affected(&self, op: &'static str, rows_affected: usize) {
        if self.enabled {
            info!(db_user = %self.db_user, op, rows_affected, "affected rows");
        }
    }

    pub(crate) fn last_insert_id(&self, id: i64) {
        if self.enabled {
            info!(db_user = %self.db_user, last_insert_id = id, "last insert id");
        }
    }

    pub(crate) fn transaction(&self, event: &'static str) {
        if self.enabled {
            info!(db_user = %self.db_user, event, "transaction");
        }
    }

    pub(crate) fn attempt_failed(&self, op: &'static str, attempt: u32, err: &DbPoolError) {
        if self.enabled {
            error!(db_user = %self.db_user, op, attempt, code = ?err.code(), error = %err, "sql attempt failed");
        }
    }

    pub(crate) fn retrying(&self, op: &'static str, attempt: u32, max_attempts: u32) {
        if self.enabled {
            warn!(db_user = %self.db_user, op, attempt, max_attempts, "retrying after connection loss");
        }
    }
}
