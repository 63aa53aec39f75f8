use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes requests through one atomic page-cache middleware.
///
/// Each `page_atomic` middleware owns its own guard, held from the cache
/// lookup until downstream handling returns, so concurrent misses on the
/// same route run the handler once and the rest are served from the cache.
/// Requests through different middleware instances never contend.
#[derive(Debug, Default)]
pub struct ConcurrencyGuard {
    lock: Arc<Mutex<()>>,
}

/// Held while a guarded request is in flight.
pub struct GuardPermit {
    _permit: OwnedMutexGuard<()>,
}

impl ConcurrencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other request holds the guard.
    pub async fn acquire(&self) -> GuardPermit {
        GuardPermit {
            _permit: self.lock.clone().lock_owned().await,
        }
    }
}
