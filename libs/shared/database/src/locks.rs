//! Keyed exclusive row locks with a bounded lock wait.
//!
//! Each key maps to its own `tokio::sync::Mutex`, so holders of different
//! keys never contend. Multi-key acquisition always happens in sorted key
//! order, which rules out lock-order deadlocks between transactions.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::DatabaseError;

type LockTable<K> = Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>;

pub struct RowLockManager<K> {
    locks: LockTable<K>,
    wait_timeout: Duration,
}

/// Holds one exclusive key lock until dropped. The last guard out removes
/// the key's entry, so the table only holds keys in use.
pub struct RowLockGuard<K: Eq + Hash> {
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockTable<K>,
}

impl<K: Eq + Hash> RowLockGuard<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash> Drop for RowLockGuard<K> {
    fn drop(&mut self) {
        // Release first so the strong count below reflects only the table
        // entry plus any waiters.
        drop(self.guard.take());
        forget_if_idle(&self.locks, &self.key);
    }
}

/// Removes `key` when the table holds the only reference to its mutex.
fn forget_if_idle<K: Eq + Hash>(locks: &LockTable<K>, key: &K) {
    let mut locks = locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if locks.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
        locks.remove(key);
    }
}

impl<K: Debug + Eq + Hash> Debug for RowLockGuard<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowLockGuard").field("key", &self.key).finish()
    }
}

impl<K> RowLockManager<K>
where
    K: Clone + Debug + Eq + Hash + Ord,
{
    pub fn new(wait_timeout: Duration) -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
            wait_timeout,
        }
    }

    fn slot(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub async fn acquire(&self, key: K) -> Result<RowLockGuard<K>, DatabaseError> {
        let slot = self.slot(&key);

        let acquired = tokio::time::timeout(self.wait_timeout, slot.lock_owned()).await;
        match acquired {
            Ok(guard) => {
                debug!("Acquired row lock {:?}", key);
                Ok(RowLockGuard {
                    key,
                    guard: Some(guard),
                    locks: Arc::clone(&self.locks),
                })
            }
            Err(_) => {
                // The holder may have left while this wait was expiring.
                forget_if_idle(&self.locks, &key);
                warn!("Lock wait timed out after {:?} for {:?}", self.wait_timeout, key);
                Err(DatabaseError::LockTimeout {
                    resource: format!("{:?}", key),
                })
            }
        }
    }

    /// Acquires every key, deduplicated, in ascending order. On failure the
    /// locks taken so far are released before returning.
    pub async fn acquire_many<I>(&self, keys: I) -> Result<Vec<RowLockGuard<K>>, DatabaseError>
    where
        I: IntoIterator<Item = K>,
    {
        let mut keys: Vec<K> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.acquire(key).await?);
        }
        Ok(guards)
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}
