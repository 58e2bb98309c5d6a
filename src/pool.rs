//! Pooled connection provider: a bb8 manager over any [`Driver`](crate::driver::Driver) and
//! the registry that shares one pool per connection target.

pub mod manager;
pub mod registry;

pub use manager::{SessionManager, SessionPool};
pub use registry::PoolRegistry;
