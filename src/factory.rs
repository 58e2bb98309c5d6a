use std::sync::Arc;

use crate::config::{ConnectionTarget, FactoryOptions};
use crate::driver::{Driver, driver_for};
use crate::error::DbPoolError;
use crate::executor::ExecutionCore;
use crate::pool::PoolRegistry;

/// Builds execution cores.
///
/// Single-connection cores are new on every call. Pooled cores are shared per normalized
/// target through a [`PoolRegistry`]:
/// ```rust,no_run
/// use std::sync::Arc;
/// use dbpool_middleware::prelude::*;
///
/// # async fn demo() -> Result<(), DbPoolError> {
/// let target = ConnectionTarget::sqlite("/var/lib/app/app.db").with_pool_size(4);
/// let a = Factory::create(&target, FactoryOptions::pooled()).await?;
/// let b = Factory::create(&target, FactoryOptions::pooled()).await?;
/// assert!(Arc::ptr_eq(&a, &b));
/// # Ok(())
/// # }
/// ```
pub struct Factory;

impl Factory {
    /// Create a core with the compiled-in driver for the target's backend, sharing pools through
    /// [`PoolRegistry::global`].
    ///
    /// # Errors
    /// Returns [`DbPoolError::ConfigurationError`] for an invalid target or a backend that is not
    /// compiled in, and [`DbPoolError::ConnectionError`] when the single connection cannot be
    /// opened.
    pub async fn create(
        target: &ConnectionTarget,
        options: FactoryOptions,
    ) -> Result<Arc<ExecutionCore>, DbPoolError> {
        target.validate()?;
        let driver = driver_for(target.backend)?;
        Self::create_with(PoolRegistry::global(), driver, target, options).await
    }

    /// Create a core with an explicit registry and driver.
    ///
    /// # Errors
    /// Same as [`create`](Self::create); also fails if `driver` serves a different backend than
    /// the target names.
    pub async fn create_with(
        registry: &PoolRegistry,
        driver: Arc<dyn Driver>,
        target: &ConnectionTarget,
        options: FactoryOptions,
    ) -> Result<Arc<ExecutionCore>, DbPoolError> {
        target.validate()?;
        if driver.database_type() != target.backend {
            return Err(DbPoolError::configuration(format!(
                "driver for {:?} cannot serve a {:?} target",
                driver.database_type(),
                target.backend
            )));
        }
        if options.pooled {
            registry.get_or_create(driver, target, options).await
        } else {
            let core = ExecutionCore::new_single(driver, target.clone(), options).await?;
            Ok(Arc::new(core))
        }
    }
}
