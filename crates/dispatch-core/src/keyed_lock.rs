//! Per-key async mutexes.
//!
//! Presence transitions await the external profile store, so two events for
//! the same driver must not interleave across that suspension point. A mutex
//! per key serializes operations for one driver without blocking any other -
//! fine-grained, not a single global lock.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A map of independently lockable async mutexes keyed by string.
///
/// Lock entries are created on first use and kept for the life of the
/// coordinator; the key population (drivers seen by this process) is small
/// and bounded by the fleet size.
#[derive(Debug, Default)]
pub(crate) struct KeyedLocks {
    inner: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting if another task holds it.
    pub(crate) async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            // Recover from poisoning: the map itself is always consistent.
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(map.entry(key.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}
