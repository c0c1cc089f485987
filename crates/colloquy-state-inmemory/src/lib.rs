//!
//! Colloquy In-Memory State - process-local storage backends
//!
//! This crate implements every repository trait from colloquy-core on plain
//! in-process maps. It suits development, testing, and single-instance
//! deployments where persistence across restarts is not required; the store
//! bundle plugs straight into the engine.
//!
//! ```no_run
//! use colloquy_core::EngineConfig;
//! use colloquy_state_inmemory::InMemoryStores;
//!
//! let config = EngineConfig::default();
//! let stores = InMemoryStores::new(&config);
//! let engine_stores = stores.engine_stores();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use colloquy_core::{EngineConfig, EngineStores};

/// Deferred work queue and its polling ticker
pub mod deferred;

/// Flow, session, group and record repositories
pub mod repositories;

/// Shared variable storage with TTLs
pub mod shared_state;

pub use deferred::InMemoryDeferredWorkQueue;
pub use repositories::{
    InMemoryFlowStore, InMemoryGroupSessionStore, InMemoryRecordStore, InMemorySessionStore,
};
pub use shared_state::InMemorySharedStateStore;

/// The complete set of in-memory stores for one engine instance.
///
/// Concrete handles stay accessible here so callers can reach the extras
/// the traits do not expose, such as the queue's `start` ticker and its
/// failed set.
#[derive(Clone)]
pub struct InMemoryStores {
    /// Flow definitions
    pub flows: Arc<InMemoryFlowStore>,
    /// Individual sessions
    pub sessions: Arc<InMemorySessionStore>,
    /// Group sessions
    pub groups: Arc<InMemoryGroupSessionStore>,
    /// Deferred work queue
    pub queue: Arc<InMemoryDeferredWorkQueue>,
    /// Owner-scoped records
    pub records: Arc<InMemoryRecordStore>,
    /// User and global variables, dispatch dedupe marks
    pub shared: Arc<InMemorySharedStateStore>,
}

impl InMemoryStores {
    /// Create a full set of stores. The session store takes its idle TTL
    /// from the engine configuration.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            flows: Arc::new(InMemoryFlowStore::new()),
            sessions: Arc::new(InMemorySessionStore::with_ttl(chrono::Duration::seconds(
                config.session_ttl_seconds as i64,
            ))),
            groups: Arc::new(InMemoryGroupSessionStore::new()),
            queue: Arc::new(InMemoryDeferredWorkQueue::new()),
            records: Arc::new(InMemoryRecordStore::new()),
            shared: Arc::new(InMemorySharedStateStore::new()),
        }
    }

    /// The same stores as trait objects, ready for the engine
    pub fn engine_stores(&self) -> EngineStores {
        EngineStores {
            flows: self.flows.clone(),
            sessions: self.sessions.clone(),
            groups: self.groups.clone(),
            queue: self.queue.clone(),
            records: self.records.clone(),
            shared: self.shared.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bundle_wires_every_store() {
        let stores = InMemoryStores::new(&EngineConfig::default());
        let engine_stores = stores.engine_stores();

        assert!(engine_stores.flows.list_active().await.unwrap().is_empty());
        assert!(engine_stores.queue.pending().await.unwrap().is_empty());
    }
}
