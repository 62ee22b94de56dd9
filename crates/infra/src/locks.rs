//! Per-key async mutual exclusion.
//!
//! The recorder's `latest` → decide → `append` sequence is not atomic at the
//! store level, so two observations of the same key must not interleave.
//! `KeyLocks` hands out one `tokio::sync::Mutex` per [`StreamKey`]; different
//! keys never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use tgarchive_core::StreamKey;

/// Entries beyond this count trigger a sweep of unused locks.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<StreamKey, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`. Released when the guard drops.
    pub async fn lock(&self, key: StreamKey) -> OwnedMutexGuard<()> {
        let lock = {
            // The registry lock is never held across an await.
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            if locks.len() >= PRUNE_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(locks.entry(key).or_default())
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tgarchive_core::PeerKind;

    fn user(raw: i64) -> StreamKey {
        StreamKey::peer(PeerKind::User, raw).unwrap()
    }

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = KeyLocks::new();
        let _held = locks.lock(user(1)).await;

        let second = tokio::time::timeout(Duration::from_millis(20), locks.lock(user(1))).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let locks = KeyLocks::new();
        let _a = locks.lock(user(1)).await;

        let b = tokio::time::timeout(Duration::from_millis(20), locks.lock(user(2))).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn unused_locks_are_pruned() {
        let locks = KeyLocks::new();
        for raw in 1..=PRUNE_THRESHOLD as i64 {
            drop(locks.lock(user(raw)).await);
        }
        let tracked = |locks: &KeyLocks| locks.locks.lock().unwrap().len();
        assert_eq!(tracked(&locks), PRUNE_THRESHOLD);

        let _held = locks.lock(user(PRUNE_THRESHOLD as i64 + 1)).await;
        assert_eq!(tracked(&locks), 1);
    }
}
