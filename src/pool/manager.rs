use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bb8::{ManageConnection, Pool};

use crate::config::ConnectionTarget;
use crate::driver::Driver;
use crate::error::DbPoolError;
use crate::session::Session;

pub type SessionPool = Pool<SessionManager>;

/// bb8 manager that opens driver connections and retires them after `max_usage` checkouts.
pub struct SessionManager {
    driver: Arc<dyn Driver>,
    target: ConnectionTarget,
    max_usage: u32,
}

impl SessionManager {
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>, target: ConnectionTarget, max_usage: u32) -> Self {
        Self {
            driver,
            target,
            max_usage,
        }
    }

    /// Build a pool sized from the target.
    ///
    /// Connections are opened lazily and not probed on checkout; a dead connection is caught by
    /// the read-path retry and then evicted through `has_broken`.
    ///
    /// # Errors
    /// Returns `DbPoolError` if pool creation fails.
    pub async fn build_pool(self, checkout_timeout: Duration) -> Result<SessionPool, DbPoolError> {
        let max_size = self.target.pool_size;
        Pool::builder()
            .max_size(max_size)
            .min_idle(None)
            .test_on_check_out(false)
            .connection_timeout(checkout_timeout)
            .build(self)
            .await
    }
}

impl ManageConnection for SessionManager {
    type Connection = Session;
    type Error = DbPoolError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let driver = Arc::clone(&self.driver);
        let target = self.target.clone();
        async move {
            let conn = driver.connect(&target).await?;
            Ok(Session::new(conn))
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move { conn.ping().await }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.is_broken()
            || conn.in_transaction()
            || (self.max_usage > 0 && conn.usage() >= self.max_usage)
    }
}
