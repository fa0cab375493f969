//! Container access arbitration
//!
//! At most one operation per container key holds the lock at a time. Waiters
//! on any key are woken on every release and re-check their own key.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Default)]
pub struct ContainerArbitrator {
    busy: Mutex<HashSet<String>>,
    released: Notify,
    acquisitions: AtomicU64,
}

impl ContainerArbitrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until `key` is free and takes it. The key is released when the
    /// returned guard is dropped.
    ///
    /// Cancel safe: a dropped future never holds the key.
    pub async fn lock(self: &Arc<Self>, key: &str) -> ContainerGuard {
        loop {
            // Registered before checking so a release in between is not missed
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if self.busy.lock().insert(key.to_string()) {
                self.acquisitions.fetch_add(1, Ordering::SeqCst);
                debug!("Acquired container lock {}", key);
                return ContainerGuard {
                    arbitrator: Arc::clone(self),
                    key: key.to_string(),
                };
            }
            released.await;
        }
    }

    fn unlock(&self, key: &str) {
        self.busy.lock().remove(key);
        self.released.notify_waiters();
        debug!("Released container lock {}", key);
    }

    pub fn is_busy(&self, key: &str) -> bool {
        self.busy.lock().contains(key)
    }

    /// Number of successful acquisitions so far
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

/// Holds a container key until dropped
#[derive(Debug)]
pub struct ContainerGuard {
    arbitrator: Arc<ContainerArbitrator>,
    key: String,
}

impl ContainerGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        self.arbitrator.unlock(&self.key);
    }
}
