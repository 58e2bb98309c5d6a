//! Convenient imports for common functionality.
//!
//! This module re-exports the types most callers need to create a core, run statements and
//! work with transaction scopes.

pub use crate::config::{ConnectionTarget, FactoryOptions};
pub use crate::driver::driver_for;
pub use crate::error::{ConnectionErrorKind, DbPoolError};
pub use crate::executor::{ExecutionCore, ScopeFuture};
pub use crate::factory::Factory;
pub use crate::pool::PoolRegistry;
pub use crate::results::{ResultSet, Row};
pub use crate::retry::RetryPolicy;
pub use crate::transaction::{CommitIntent, Outcome, ScopeState, TransactionScope};
pub use crate::translation::{PlaceholderStyle, translate_placeholders};
pub use crate::types::{DatabaseType, RowValues};
