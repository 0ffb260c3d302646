//! Per-resource mutual exclusion.
//!
//! Some Scaleway calls cannot safely interleave on the same remote
//! resource, such as attaching several private NICs to one server. The
//! [`LockTable`] hands out one async mutex per resource, keyed by the bare
//! id so that `<uuid>` and `fr-par-1/<uuid>` share a lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::trace;

use crate::locality::expand_id;

/// A process-wide table of per-resource locks.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Held while a critical section runs; releases on drop, including unwinds.
#[derive(Debug)]
pub struct ResourceGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl ResourceGuard {
    /// The normalized key this guard holds.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl LockTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize an identifier into a lock key.
    ///
    /// Identifiers that cannot be expanded are used verbatim.
    pub fn key(id: &str) -> String {
        expand_id(id).unwrap_or_else(|_| id.to_string())
    }

    /// Wait for and take the lock of `id`.
    pub async fn lock(&self, id: &str) -> ResourceGuard {
        let key = Self::key(id);
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(key.clone()).or_default().clone()
        };
        trace!(key = %key, "waiting for resource lock");
        let guard = mutex.lock_owned().await;
        ResourceGuard { key, _guard: guard }
    }

    /// Take the locks of several ids, in a stable order.
    ///
    /// Duplicates (after normalization) are locked once.
    pub async fn lock_all(&self, ids: &[String]) -> Vec<ResourceGuard> {
        let mut keys: Vec<String> = ids.iter().map(|id| Self::key(id)).collect();
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(&key).await);
        }
        guards
    }

    /// Number of keys ever locked.
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no key was ever locked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
