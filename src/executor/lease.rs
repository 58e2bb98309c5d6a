use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bb8::PooledConnection;
use tokio::sync::OwnedMappedMutexGuard;

use crate::error::DbPoolError;
use crate::pool::SessionManager;
use crate::session::Session;

/// Exclusive access to one session for the duration of an operation or a transaction scope.
///
/// Dropping a pooled lease hands the connection back to bb8, which evicts it if it is broken,
/// still inside a transaction, or past its usage cap.
pub(crate) enum Lease {
    Single(OwnedMappedMutexGuard<Option<Session>, Session>),
    Pooled(PooledConnection<'static, SessionManager>),
}

impl Deref for Lease {
    type Target = Session;

    fn deref(&self) -> &Session {
        match self {
            Lease::Single(guard) => &**guard,
            Lease::Pooled(conn) => &**conn,
        }
    }
}

impl DerefMut for Lease {
    fn deref_mut(&mut self) -> &mut Session {
        match self {
            Lease::Single(guard) => &mut **guard,
            Lease::Pooled(conn) => &mut **conn,
        }
    }
}

/// Marks the single connection of a core as owned by a transaction scope.
///
/// Released on drop, after the lease it accompanies.
pub(crate) struct ScopeClaim(Arc<AtomicBool>);

impl ScopeClaim {
    pub(crate) fn acquire(flag: &Arc<AtomicBool>) -> Result<Self, DbPoolError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| {
                DbPoolError::usage(
                    "a transaction scope is already active on this single-connection core",
                )
            })?;
        Ok(Self(Arc::clone(flag)))
    }
}

impl Drop for ScopeClaim {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
