// Per-track mutual exclusion: one delivery run per id at a time.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Default)]
pub struct InflightLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held while a run owns its id. Dropping it releases the id and prunes the map.
pub struct InflightGuard<'a> {
    owner: &'a InflightLocks,
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl InflightLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other run holds `id`, then take it.
    pub async fn acquire(&self, id: &str) -> InflightGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(id.to_string()).or_default())
        };

        if lock.try_lock().is_err() {
            debug!("[{}] another request is in flight, waiting", id);
        }
        let guard = lock.lock_owned().await;

        InflightGuard {
            owner: self,
            id: id.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of ids currently held or awaited.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        // Release before pruning so the strong count below reflects waiters only.
        self.guard.take();
        let mut locks = self.owner.locks.lock();
        if let Some(lock) = locks.get(&self.id) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(&self.id);
            }
        }
    }
}
