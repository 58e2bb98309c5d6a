use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use tokio::sync::Mutex;

use crate::config::{ConnectionTarget, FactoryOptions, TargetKey};
use crate::driver::Driver;
use crate::error::DbPoolError;
use crate::executor::ExecutionCore;

static GLOBAL: LazyLock<PoolRegistry> = LazyLock::new(PoolRegistry::new);

/// Shares one pooled [`ExecutionCore`] per normalized connection target.
///
/// Entries are created on first request and kept until [`clear`](Self::clear). Check and insert
/// happen under one lock, so concurrent first requests for a target build a single pool.
/// Options passed with later requests for an existing target are ignored.
#[derive(Default)]
pub struct PoolRegistry {
    cores: Mutex<HashMap<TargetKey, Arc<ExecutionCore>>>,
}

impl PoolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used by [`Factory::create`](crate::factory::Factory::create).
    #[must_use]
    pub fn global() -> &'static PoolRegistry {
        &GLOBAL
    }

    /// Return the pooled core for `target`, building it on first request.
    ///
    /// # Errors
    /// Returns `DbPoolError` if the target is invalid or the pool cannot be built.
    pub async fn get_or_create(
        &self,
        driver: Arc<dyn Driver>,
        target: &ConnectionTarget,
        options: FactoryOptions,
    ) -> Result<Arc<ExecutionCore>, DbPoolError> {
        target.validate_pooled()?;
        let key = target.key();

        let mut cores = self.cores.lock().await;
        if let Some(existing) = cores.get(&key) {
            tracing::debug!(target_key = ?key, "reusing pooled core");
            return Ok(Arc::clone(existing));
        }

        let core = Arc::new(ExecutionCore::new_pooled(driver, target.clone(), options).await?);
        tracing::debug!(target_key = ?key, pool_size = target.pool_size, "created pooled core");
        cores.insert(key, Arc::clone(&core));
        Ok(core)
    }

    /// Look up an existing pooled core without creating one.
    pub async fn get(&self, target: &ConnectionTarget) -> Option<Arc<ExecutionCore>> {
        self.cores.lock().await.get(&target.key()).cloned()
    }

    /// Number of distinct pools held.
    pub async fn len(&self) -> usize {
        self.cores.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cores.lock().await.is_empty()
    }

    /// Drop every registered pool. Cores still held by callers keep working; later requests
    /// build fresh pools.
    pub async fn clear(&self) {
        self.cores.lock().await.clear();
    }
}
