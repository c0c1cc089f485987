//! In-memory shared state with per-key TTLs
//!
//! Backs the `user` and `global` variable scopes. Expired entries read as
//! absent immediately; a background task physically removes them once a
//! minute.

use async_trait::async_trait;
use colloquy_core::domain::repository::SharedStateStore;
use colloquy_core::EngineError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use tracing::debug;

struct ValueWithExpiry {
    value: Value,
    expires_at: Option<SystemTime>,
}

impl ValueWithExpiry {
    fn is_expired(&self, now: SystemTime) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }
}

type ScopeMap = HashMap<String, HashMap<String, ValueWithExpiry>>;

/// Scope -> key -> value map with lazy expiry on read
pub struct InMemorySharedStateStore {
    state: Arc<RwLock<ScopeMap>>,
}

impl InMemorySharedStateStore {
    /// Create a store and start its cleanup task
    pub fn new() -> Self {
        let state = Arc::new(RwLock::new(HashMap::new()));
        Self::start_cleanup_task(state.clone());
        Self { state }
    }

    fn start_cleanup_task(state: Arc<RwLock<ScopeMap>>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;

                let now = SystemTime::now();
                let mut expired = Vec::new();
                {
                    let state = state.read().await;
                    for (scope, entries) in state.iter() {
                        for (key, entry) in entries.iter() {
                            if entry.is_expired(now) {
                                expired.push((scope.clone(), key.clone()));
                            }
                        }
                    }
                }

                if !expired.is_empty() {
                    let mut state = state.write().await;
                    for (scope, key) in expired {
                        if let Some(entries) = state.get_mut(&scope) {
                            entries.remove(&key);
                            debug!(%scope, %key, "Removed expired shared state entry");
                        }
                    }
                }
            }
        });
    }
}

impl Default for InMemorySharedStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedStateStore for InMemorySharedStateStore {
    async fn get(&self, scope: &str, key: &str) -> Result<Option<Value>, EngineError> {
        let state = self.state.read().await;
        Ok(state.get(scope).and_then(|entries| {
            entries
                .get(key)
                .filter(|entry| !entry.is_expired(SystemTime::now()))
                .map(|entry| entry.value.clone())
        }))
    }

    async fn set(&self, scope: &str, key: &str, value: Value) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        state.entry(scope.to_string()).or_default().insert(
            key.to_string(),
            ValueWithExpiry {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_with_ttl(
        &self,
        scope: &str,
        key: &str,
        value: Value,
        ttl_ms: u64,
    ) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        state.entry(scope.to_string()).or_default().insert(
            key.to_string(),
            ValueWithExpiry {
                value,
                expires_at: Some(SystemTime::now() + Duration::from_millis(ttl_ms)),
            },
        );
        Ok(())
    }

    async fn delete(&self, scope: &str, key: &str) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        if let Some(entries) = state.get_mut(scope) {
            entries.remove(key);
        }
        Ok(())
    }

    async fn list(&self, scope: &str) -> Result<HashMap<String, Value>, EngineError> {
        let state = self.state.read().await;
        let now = SystemTime::now();
        Ok(state
            .get(scope)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, entry)| !entry.is_expired(now))
                    .map(|(key, entry)| (key.clone(), entry.value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
