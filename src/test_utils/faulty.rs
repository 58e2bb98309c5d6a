use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::config::ConnectionTarget;
use crate::driver::{Driver, DriverConnection, ExecuteOutcome};
use crate::error::{ConnectionErrorKind, DbPoolError};
use crate::results::ResultSet;
use crate::translation::PlaceholderStyle;
use crate::types::{DatabaseType, RowValues};

/// Driver operations a fault can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultOp {
    Connect,
    Query,
    Execute,
    ExecuteMany,
    Begin,
    Commit,
    Rollback,
    LastInsertId,
    Ping,
}

/// A scripted failure. The wrapped driver is not called when a fault fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    ServerGoneAway,
    LostDuringQuery,
    Query(String),
}

impl Fault {
    fn into_error(self, op: FaultOp) -> DbPoolError {
        match self {
            Fault::ServerGoneAway => DbPoolError::connection(
                ConnectionErrorKind::ServerGoneAway,
                format!("injected: server has gone away ({op:?})"),
            ),
            Fault::LostDuringQuery => DbPoolError::connection(
                ConnectionErrorKind::LostDuringQuery,
                format!("injected: lost connection during query ({op:?})"),
            ),
            Fault::Query(message) => DbPoolError::query(None, format!("injected: {message}")),
        }
    }
}

#[derive(Default)]
struct FaultState {
    script: Mutex<HashMap<FaultOp, VecDeque<Fault>>>,
    calls: Mutex<HashMap<FaultOp, usize>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FaultState {
    /// Count the call, then fire the next scripted fault for `op` if there is one.
    fn check(&self, op: FaultOp) -> Result<(), DbPoolError> {
        *lock(&self.calls).entry(op).or_default() += 1;
        let fault = lock(&self.script).get_mut(&op).and_then(VecDeque::pop_front);
        match fault {
            Some(fault) => {
                tracing::debug!(?op, ?fault, "injecting fault");
                Err(fault.into_error(op))
            }
            None => Ok(()),
        }
    }
}

/// Wraps a driver, counting every operation and failing the ones scripted to fail.
///
/// Clones share the script and the counters, so keep one clone to drive the test and hand
/// another to the factory:
/// ```rust,no_run
/// use std::sync::Arc;
/// use dbpool_middleware::prelude::*;
/// use dbpool_middleware::test_utils::{Fault, FaultOp, FaultyDriver};
///
/// # async fn demo() -> Result<(), DbPoolError> {
/// let faulty = FaultyDriver::new(driver_for(DatabaseType::Sqlite)?);
/// faulty.fail_times(FaultOp::Query, Fault::ServerGoneAway, 2);
///
/// let target = ConnectionTarget::sqlite(":memory:");
/// let core = Factory::create_with(
///     &PoolRegistry::new(),
///     Arc::new(faulty.clone()),
///     &target,
///     FactoryOptions::single(),
/// )
/// .await?;
/// core.fetch_all("SELECT 1", &[]).await?;
/// assert_eq!(faulty.calls(FaultOp::Query), 3);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FaultyDriver {
    inner: Arc<dyn Driver>,
    state: Arc<FaultState>,
}

impl FaultyDriver {
    #[must_use]
    pub fn new(inner: Arc<dyn Driver>) -> Self {
        Self {
            inner,
            state: Arc::new(FaultState::default()),
        }
    }

    /// Fail the next call of `op` with `fault`. Faults queue up per operation.
    pub fn fail_next(&self, op: FaultOp, fault: Fault) {
        self.fail_times(op, fault, 1);
    }

    /// Fail the next `times` calls of `op` with `fault`.
    pub fn fail_times(&self, op: FaultOp, fault: Fault, times: usize) {
        let mut script = lock(&self.state.script);
        let queue = script.entry(op).or_default();
        queue.extend(std::iter::repeat_n(fault, times));
    }

    /// Faults still queued for `op`.
    #[must_use]
    pub fn pending(&self, op: FaultOp) -> usize {
        lock(&self.state.script).get(&op).map_or(0, VecDeque::len)
    }

    /// Calls of `op` seen so far, including the ones that failed.
    #[must_use]
    pub fn calls(&self, op: FaultOp) -> usize {
        lock(&self.state.calls).get(&op).copied().unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        lock(&self.state.calls).clear();
    }
}

#[async_trait]
impl Driver for FaultyDriver {
    fn database_type(&self) -> DatabaseType {
        self.inner.database_type()
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        self.inner.placeholder_style()
    }

    async fn connect(
        &self,
        target: &ConnectionTarget,
    ) -> Result<Box<dyn DriverConnection>, DbPoolError> {
        self.state.check(FaultOp::Connect)?;
        let inner = self.inner.connect(target).await?;
        Ok(Box::new(FaultyConnection {
            inner,
            state: Arc::clone(&self.state),
        }))
    }
}

struct FaultyConnection {
    inner: Box<dyn DriverConnection>,
    state: Arc<FaultState>,
}

#[async_trait]
impl DriverConnection for FaultyConnection {
    async fn query(&mut self, sql: &str, params: &[RowValues]) -> Result<ResultSet, DbPoolError> {
        self.state.check(FaultOp::Query)?;
        self.inner.query(sql, params).await
    }

    async fn execute(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ExecuteOutcome, DbPoolError> {
        self.state.check(FaultOp::Execute)?;
        self.inner.execute(sql, params).await
    }

    async fn execute_many(
        &mut self,
        sql: &str,
        param_sets: &[Vec<RowValues>],
    ) -> Result<usize, DbPoolError> {
        self.state.check(FaultOp::ExecuteMany)?;
        self.inner.execute_many(sql, param_sets).await
    }

    async fn begin(&mut self) -> Result<(), DbPoolError> {
        self.state.check(FaultOp::Begin)?;
        self.inner.begin().await
    }

    async fn commit(&mut self) -> Result<(), DbPoolError> {
        self.state.check(FaultOp::Commit)?;
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<(), DbPoolError> {
        self.state.check(FaultOp::Rollback)?;
        self.inner.rollback().await
    }

    async fn last_insert_id(&mut self) -> Result<i64, DbPoolError> {
        self.state.check(FaultOp::LastInsertId)?;
        self.inner.last_insert_id().await
    }

    async fn ping(&mut self) -> Result<(), DbPoolError> {
        self.state.check(FaultOp::Ping)?;
        self.inner.ping().await
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
