//! Keyed serialization of runs per firewall connection identity.
//!
//! Two concurrent runs mutating the same management plane race on shared
//! state (both fetch a group's membership, both write a reduced copy, one
//! update is lost). Runs are therefore serialized per connection key, while
//! runs against different firewalls or partitions proceed in parallel.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Registry of per-connection mutual exclusion locks.
///
/// Keys come from [`ConnectionProfile::connection_key`]; the registry is
/// shared by every orchestrator in the process (typically one `Arc` held by
/// the task executor).
///
/// [`ConnectionProfile::connection_key`]: crate::ConnectionProfile::connection_key
#[derive(Debug, Default)]
pub struct ConnectionLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ConnectionLocks {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for the given connection key, waiting if another
    /// run holds it. The guard is released on drop, at run exit.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        debug!(key, "acquiring connection lock");
        let guard = lock.lock_owned().await;
        debug!(key, "connection lock acquired");
        guard
    }

    /// Number of distinct connection keys seen so far.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Returns true if no key has been locked yet.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
