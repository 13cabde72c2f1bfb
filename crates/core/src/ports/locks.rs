//! Keyed async locks serializing work on the same customer and period.

use std::sync::Arc;

use dashmap::DashMap;
use tally_shared::types::{CustomerId, OrganizationId};
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<String, Arc<Mutex<()>>>;

/// Async mutexes created on demand per key.
///
/// Two operations on the same key run one after the other; operations on
/// different keys run concurrently. A key's mutex is dropped from the
/// table once nobody holds or waits for it.
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<LockTable>,
}

/// Held lock on one key. Releasing it evicts the key when idle.
#[derive(Debug)]
pub struct KeyGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    locks: Arc<LockTable>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // The table's own reference is the last one unless a waiter cloned it.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl KeyedLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for and returns the guard for `key`.
    pub async fn lock(&self, key: impl Into<String>) -> KeyGuard {
        let key = key.into();
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        KeyGuard {
            guard: Some(mutex.lock_owned().await),
            key,
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of keys currently held or awaited.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Returns true if no key is held or awaited.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Key for one customer's work in one period.
    #[must_use]
    pub fn customer_period_key(
        organization_id: OrganizationId,
        customer_id: CustomerId,
        period: impl std::fmt::Display,
    ) -> String {
        format!("{organization_id}:{customer_id}:{period}")
    }

    /// Key guarding a customer's invoices and payments. Matching and
    /// settlement processing both write them.
    #[must_use]
    pub fn customer_documents_key(organization_id: OrganizationId, customer_id: CustomerId) -> String {
        Self::customer_period_key(organization_id, customer_id, "documents")
    }
}
