//! # Per-Medicine Locks
//!
//! Serializes ledger writes per `medicine_id` inside the process.
//!
//! ## Lock Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Sale A touches {ibu, amox}      Sale B touches {amox, zinc}            │
//! │                                                                         │
//! │  A: lock amox → lock ibu         B: lock amox (waits for A)             │
//! │                                                                         │
//! │  Ids are always locked in sorted order, so two batches over            │
//! │  overlapping medicines can never wait on each other in a cycle.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Locks are taken before a pooled connection is acquired and held until the
//! transaction commits or rolls back. Across processes, SQLite's writer lock
//! plus the `version` compare-and-swap on `stock_balance` do the same job.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// Table of one async mutex per medicine id, created on first use.
#[derive(Debug, Default)]
pub struct MedicineLocks {
    table: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Guards for a set of medicines. Dropping it releases every lock.
#[derive(Debug)]
pub struct MedicineGuard {
    ids: Vec<String>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl MedicineGuard {
    /// Locked ids, sorted.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn covers(&self, medicine_id: &str) -> bool {
        self.ids.binary_search_by(|id| id.as_str().cmp(medicine_id)).is_ok()
    }
}

impl MedicineLocks {
    pub fn new() -> Self {
        MedicineLocks::default()
    }

    /// Locks every id in `ids`, in sorted order.
    ///
    /// Takes an owned set so the returned future borrows nothing from the
    /// caller and can run on a spawned task. Build it with [`lock_set`].
    pub async fn acquire(&self, ids: BTreeSet<String>) -> MedicineGuard {
        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            let lock = self.lock_for(id);
            guards.push(lock.lock_owned().await);
            trace!(medicine_id = %id, "Medicine lock acquired");
        }

        MedicineGuard {
            ids: ids.into_iter().collect(),
            _guards: guards,
        }
    }

    /// Number of medicines that have ever been locked.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_for(&self, medicine_id: &str) -> Arc<AsyncMutex<()>> {
        self.table()
            .entry(medicine_id.to_string())
            .or_default()
            .clone()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
        // Entries are insert-only, so a poisoned map is still valid.
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Distinct, sorted medicine ids for [`MedicineLocks::acquire`].
pub fn lock_set<I, S>(ids: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    ids.into_iter().map(|id| id.as_ref().to_string()).collect()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_sorts_and_dedups() {
        let locks = MedicineLocks::new();
        let guard = locks.acquire(lock_set(["zinc", "amox", "zinc", "ibu"])).await;

        assert_eq!(guard.ids(), &["amox", "ibu", "zinc"]);
        assert!(guard.covers("ibu"));
        assert!(!guard.covers("para"));
        assert_eq!(locks.len(), 3);
    }

    #[tokio::test]
    async fn test_same_medicine_is_exclusive() {
        let locks = Arc::new(MedicineLocks::new());
        let held = locks.acquire(lock_set(["amox"])).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _g = locks.acquire(lock_set(["amox"])).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should acquire after release")
            .unwrap();
    }

    #[tokio::test]
    async fn test_disjoint_medicines_do_not_block() {
        let locks = MedicineLocks::new();
        let _a = locks.acquire(lock_set(["amox"])).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire(lock_set(["ibu"]))).await;
        assert!(b.is_ok());
    }
}
