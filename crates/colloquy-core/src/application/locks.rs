//! Per-key execution locks
//!
//! Every session and group gets its own async mutex so work on the same key
//! is strictly serialized while unrelated keys proceed in parallel. Lock
//! ordering is always session before group; nothing acquires a session lock
//! while holding a group lock.

use crate::domain::group::GroupSessionId;
use crate::domain::session::SessionKey;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock key for a session
pub fn session_lock_key(key: &SessionKey) -> String {
    format!("session:{}", key.0)
}

/// Lock key for a group session
pub fn group_lock_key(id: &GroupSessionId) -> String {
    format!("group:{}", id.0)
}

/// Registry of named async mutexes
#[derive(Debug, Default)]
pub struct SessionLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionLocks {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a key, waiting if another task holds it
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        // The map reference must be dropped before awaiting the mutex
        let lock = {
            let entry = self
                .locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())));
            entry.clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_serializes() {
        let locks = Arc::new(SessionLocks::new());
        let order = Arc::new(StdMutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let locks = locks.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("session:f1:c1").await;
                order.lock().unwrap().push(format!("start-{}", i));
                tokio::time::sleep(Duration::from_millis(5)).await;
                order.lock().unwrap().push(format!("end-{}", i));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Every start is immediately followed by its own end
        let order = order.lock().unwrap();
        for pair in order.chunks(2) {
            let start = pair[0].strip_prefix("start-").unwrap();
            let end = pair[1].strip_prefix("end-").unwrap();
            assert_eq!(start, end);
        }
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = Arc::new(SessionLocks::new());
        let _held = locks.acquire("session:f1:c1").await;

        // A different key acquires immediately
        let other = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire("session:f1:c2"),
        )
        .await;
        assert!(other.is_ok());
    }

    #[test]
    fn test_lock_key_prefixes() {
        assert_eq!(
            session_lock_key(&SessionKey("f1:c1".to_string())),
            "session:f1:c1"
        );
        assert_eq!(
            group_lock_key(&GroupSessionId("g1".to_string())),
            "group:g1"
        );
    }
}
