use crate::driver::ExecuteOutcome;
use crate::error::DbPoolError;
use crate::results::ResultSet;
use crate::session::Session;
use crate::types::RowValues;

use super::ExecutionCore;

// Statement primitives shared by the core and by transaction scopes. They run exactly once on
// the session they are given; retry and checkout are the caller's concern.
impl ExecutionCore {
    pub(crate) async fn query_on(
        &self,
        session: &mut Session,
        op: &'static str,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, DbPoolError> {
        let sql = self.prepare(sql);
        self.log.statement(op, &sql, params);
        let rows = session.query(&sql, params).await?;
        self.log.rows(op, rows.len());
        Ok(rows)
    }

    /// Run one mutating statement, committing right away unless a transaction is open.
    pub(crate) async fn execute_on(
        &self,
        session: &mut Session,
        op: &'static str,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ExecuteOutcome, DbPoolError> {
        let sql = self.prepare(sql);
        self.log.statement(op, &sql, params);
        let outcome = session.execute(&sql, params).await?;
        if !session.in_transaction() {
            session.commit().await?;
        }
        self.log.affected(op, outcome.rows_affected);
        Ok(outcome)
    }

    pub(crate) async fn execute_returning_id_on(
        &self,
        session: &mut Session,
        sql: &str,
        params: &[RowValues],
    ) -> Result<i64, DbPoolError> {
        let outcome = self
            .execute_on(session, "execute_returning_id", sql, params)
            .await?;
        let id = match outcome.last_insert_id {
            Some(id) => id,
            None => session.last_insert_id().await?,
        };
        self.log.last_insert_id(id);
        Ok(id)
    }

    pub(crate) async fn execute_many_on(
        &self,
        session: &mut Session,
        sql: &str,
        param_sets: &[Vec<RowValues>],
    ) -> Result<usize, DbPoolError> {
        let sql = self.prepare(sql);
        self.log.batch("execute_many", &sql, param_sets);
        let affected = session.execute_many(&sql, param_sets).await?;
        if !session.in_transaction() {
            session.commit().await?;
        }
        self.log.affected("execute_many", affected);
        Ok(affected)
    }

    pub(crate) async fn last_insert_id_on(
        &self,
        session: &mut Session,
    ) -> Result<i64, DbPoolError> {
        let id = session.last_insert_id().await?;
        self.log.last_insert_id(id);
        Ok(id)
    }
}
