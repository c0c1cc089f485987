//! Repository traits for persistent state
//!
//! The engine only talks to storage through these traits, always as
//! `Arc<dyn ...>`. The `memory` module provides plain in-process
//! implementations used by unit tests; production deployments wire in the
//! implementations from a state crate.

use crate::domain::deferred::DeferredWorkItem;
use crate::domain::flow::{FlowDefinition, FlowId, OwnerId};
use crate::domain::group::{GroupSession, GroupSessionId};
use crate::domain::session::{Session, SessionKey};
use crate::error::EngineError;
use crate::types::{ChatId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Storage for flow definitions
#[async_trait]
pub trait FlowDefinitionRepository: Send + Sync {
    /// Persist a definition, replacing any previous version
    async fn save(&self, flow: FlowDefinition) -> Result<FlowDefinition, EngineError>;

    /// Look up a definition by id
    async fn find_by_id(&self, id: &FlowId) -> Result<Option<FlowDefinition>, EngineError>;

    /// All currently active definitions
    async fn list_active(&self) -> Result<Vec<FlowDefinition>, EngineError>;

    /// Flip the active flag
    async fn set_active(&self, id: &FlowId, active: bool) -> Result<FlowDefinition, EngineError>;
}

/// Storage for individual sessions, keyed by session key
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert a fresh session. A terminal occupant of the same key is
    /// replaced; an active occupant is an error.
    async fn insert_new(&self, session: Session) -> Result<Session, EngineError>;

    /// The active session under a key, if any
    async fn find_active(&self, key: &SessionKey) -> Result<Option<Session>, EngineError>;

    /// The active session for a chat, if any
    async fn find_active_by_chat(&self, chat_id: &ChatId) -> Result<Option<Session>, EngineError>;

    /// The session under a key regardless of status
    async fn find(&self, key: &SessionKey) -> Result<Option<Session>, EngineError>;

    /// Persist a session, guarded by optimistic concurrency. The stored
    /// version must equal `expected_version`; on success the version is
    /// bumped and the stored session returned.
    async fn update(&self, session: &Session, expected_version: u64)
        -> Result<Session, EngineError>;

    /// Expire every active session idle longer than `ttl`, returning the
    /// sessions that were transitioned
    async fn expire_idle(&self, ttl: chrono::Duration) -> Result<Vec<Session>, EngineError>;
}

/// Storage for group sessions
#[async_trait]
pub trait GroupSessionRepository: Send + Sync {
    /// Insert a fresh group session
    async fn insert_new(&self, group: GroupSession) -> Result<GroupSession, EngineError>;

    /// Look up a group session by id
    async fn find(&self, id: &GroupSessionId) -> Result<Option<GroupSession>, EngineError>;

    /// Persist a group session
    async fn update(&self, group: &GroupSession) -> Result<GroupSession, EngineError>;

    /// Atomically add a participant. The bool is true when the participant
    /// was not already a member.
    async fn add_participant(
        &self,
        id: &GroupSessionId,
        user_id: &UserId,
    ) -> Result<(GroupSession, bool), EngineError>;

    /// Atomically remove a participant. When the last member leaves the
    /// group transitions to completed; the bool reports that.
    async fn remove_participant(
        &self,
        id: &GroupSessionId,
        user_id: &UserId,
    ) -> Result<(GroupSession, bool), EngineError>;
}

/// Queue of deferred work items with at-least-once delivery
#[async_trait]
pub trait DeferredWorkQueue: Send + Sync {
    /// Add an item to the queue
    async fn enqueue(&self, item: DeferredWorkItem) -> Result<(), EngineError>;

    /// Remove a successfully processed item
    async fn ack(&self, id: &str) -> Result<(), EngineError>;

    /// Put an item back with a new due time and attempt count
    async fn reschedule(
        &self,
        id: &str,
        due_at: DateTime<Utc>,
        attempts: u32,
    ) -> Result<(), EngineError>;

    /// Move an item to the failed set
    async fn fail(&self, id: &str) -> Result<(), EngineError>;

    /// Take every due item, marking each in flight so concurrent pollers do
    /// not double-deliver within one process
    async fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<DeferredWorkItem>, EngineError>;

    /// Everything still queued, due or not
    async fn pending(&self) -> Result<Vec<DeferredWorkItem>, EngineError>;
}

/// One row of an owner-scoped record collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Record identifier, assigned by the store
    pub id: String,
    /// Owning account
    pub owner_id: OwnerId,
    /// Collection name
    pub collection: String,
    /// Record payload
    pub data: Value,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

/// Simple owner-scoped record storage for flow-managed data
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a record into a collection
    async fn insert(
        &self,
        owner_id: &OwnerId,
        collection: &str,
        data: Value,
    ) -> Result<StoredRecord, EngineError>;

    /// Fetch one record by id
    async fn get(
        &self,
        owner_id: &OwnerId,
        collection: &str,
        id: &str,
    ) -> Result<Option<StoredRecord>, EngineError>;

    /// Records whose data matches every field of `filter`
    async fn find(
        &self,
        owner_id: &OwnerId,
        collection: &str,
        filter: &serde_json::Map<String, Value>,
        limit: Option<usize>,
    ) -> Result<Vec<StoredRecord>, EngineError>;

    /// Shallow-merge `patch` into every matching record, returning the count
    async fn update_matching(
        &self,
        owner_id: &OwnerId,
        collection: &str,
        filter: &serde_json::Map<String, Value>,
        patch: &serde_json::Map<String, Value>,
    ) -> Result<usize, EngineError>;

    /// Delete every matching record, returning the count
    async fn delete_matching(
        &self,
        owner_id: &OwnerId,
        collection: &str,
        filter: &serde_json::Map<String, Value>,
    ) -> Result<usize, EngineError>;
}

/// Key-value storage for variables that outlive a session
#[async_trait]
pub trait SharedStateStore: Send + Sync {
    /// Read one key
    async fn get(&self, scope: &str, key: &str) -> Result<Option<Value>, EngineError>;

    /// Write one key
    async fn set(&self, scope: &str, key: &str, value: Value) -> Result<(), EngineError>;

    /// Write one key with a time-to-live in milliseconds. Stores without
    /// expiry support treat this as a plain set.
    async fn set_with_ttl(
        &self,
        scope: &str,
        key: &str,
        value: Value,
        ttl_ms: u64,
    ) -> Result<(), EngineError> {
        let _ = ttl_ms;
        self.set(scope, key, value).await
    }

    /// Remove one key
    async fn delete(&self, scope: &str, key: &str) -> Result<(), EngineError>;

    /// Every key in a scope
    async fn list(&self, scope: &str) -> Result<HashMap<String, Value>, EngineError>;
}

/// Scope name for one user's variables under an owner
pub fn user_scope(owner_id: &OwnerId, user_id: &UserId) -> String {
    format!("user:{}:{}", owner_id.0, user_id.0)
}

/// Scope name for an owner's global variables
pub fn global_scope(owner_id: &OwnerId) -> String {
    format!("global:{}", owner_id.0)
}

/// In-process repository implementations for tests
#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use dashmap::DashMap;
    use std::sync::RwLock;
    use uuid::Uuid;

    /// Flow definitions in a hash map
    #[derive(Debug, Default)]
    pub struct MemoryFlowDefinitionRepository {
        flows: RwLock<HashMap<String, FlowDefinition>>,
    }

    impl MemoryFlowDefinitionRepository {
        /// Create an empty repository
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl FlowDefinitionRepository for MemoryFlowDefinitionRepository {
        async fn save(&self, flow: FlowDefinition) -> Result<FlowDefinition, EngineError> {
            let mut flows = self
                .flows
                .write()
                .map_err(|e| EngineError::StateStoreError(format!("lock poisoned: {}", e)))?;
            flows.insert(flow.id.0.clone(), flow.clone());
            Ok(flow)
        }

        async fn find_by_id(&self, id: &FlowId) -> Result<Option<FlowDefinition>, EngineError> {
            let flows = self
                .flows
                .read()
                .map_err(|e| EngineError::StateStoreError(format!("lock poisoned: {}", e)))?;
            Ok(flows.get(&id.0).cloned())
        }

        async fn list_active(&self) -> Result<Vec<FlowDefinition>, EngineError> {
            let flows = self
                .flows
                .read()
                .map_err(|e| EngineError::StateStoreError(format!("lock poisoned: {}", e)))?;
            Ok(flows.values().filter(|f| f.active).cloned().collect())
        }

        async fn set_active(
            &self,
            id: &FlowId,
            active: bool,
        ) -> Result<FlowDefinition, EngineError> {
            let mut flows = self
                .flows
                .write()
                .map_err(|e| EngineError::StateStoreError(format!("lock poisoned: {}", e)))?;
            let flow = flows
                .get_mut(&id.0)
                .ok_or_else(|| EngineError::FlowNotFound(id.0.clone()))?;
            flow.active = active;
            Ok(flow.clone())
        }
    }

    /// Sessions in a concurrent map keyed by session key
    #[derive(Debug, Default)]
    pub struct MemorySessionRepository {
        sessions: DashMap<String, Session>,
    }

    impl MemorySessionRepository {
        /// Create an empty repository
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl SessionRepository for MemorySessionRepository {
        async fn insert_new(&self, session: Session) -> Result<Session, EngineError> {
            let key = session.session_key.0.clone();
            if let Some(existing) = self.sessions.get(&key) {
                if existing.is_active() {
                    return Err(EngineError::StateStoreError(format!(
                        "Active session already exists for key: {}",
                        key
                    )));
                }
            }
            self.sessions.insert(key, session.clone());
            Ok(session)
        }

        async fn find_active(&self, key: &SessionKey) -> Result<Option<Session>, EngineError> {
            Ok(self
                .sessions
                .get(&key.0)
                .filter(|s| s.is_active())
                .map(|s| s.clone()))
        }

        async fn find_active_by_chat(
            &self,
            chat_id: &ChatId,
        ) -> Result<Option<Session>, EngineError> {
            Ok(self
                .sessions
                .iter()
                .find(|entry| entry.chat_id == *chat_id && entry.is_active())
                .map(|entry| entry.clone()))
        }

        async fn find(&self, key: &SessionKey) -> Result<Option<Session>, EngineError> {
            Ok(self.sessions.get(&key.0).map(|s| s.clone()))
        }

        async fn update(
            &self,
            session: &Session,
            expected_version: u64,
        ) -> Result<Session, EngineError> {
            let mut entry = self
                .sessions
                .get_mut(&session.session_key.0)
                .ok_or_else(|| EngineError::SessionNotFound(session.session_key.0.clone()))?;
            if entry.version != expected_version {
                return Err(EngineError::VersionConflict(format!(
                    "Session {} is at version {}, expected {}",
                    session.session_key.0, entry.version, expected_version
                )));
            }
            let mut updated = session.clone();
            updated.version = expected_version + 1;
            *entry = updated.clone();
            Ok(updated)
        }

        async fn expire_idle(&self, ttl: chrono::Duration) -> Result<Vec<Session>, EngineError> {
            let now = Utc::now();
            let mut expired = Vec::new();
            for mut entry in self.sessions.iter_mut() {
                if entry.is_active() && entry.is_idle(ttl, now) {
                    if entry.expire().is_ok() {
                        entry.version += 1;
                        expired.push(entry.clone());
                    }
                }
            }
            Ok(expired)
        }
    }

    /// Group sessions in a concurrent map
    #[derive(Debug, Default)]
    pub struct MemoryGroupSessionRepository {
        groups: DashMap<String, GroupSession>,
    }

    impl MemoryGroupSessionRepository {
        /// Create an empty repository
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl GroupSessionRepository for MemoryGroupSessionRepository {
        async fn insert_new(&self, group: GroupSession) -> Result<GroupSession, EngineError> {
            self.groups.insert(group.id.0.clone(), group.clone());
            Ok(group)
        }

        async fn find(&self, id: &GroupSessionId) -> Result<Option<GroupSession>, EngineError> {
            Ok(self.groups.get(&id.0).map(|g| g.clone()))
        }

        async fn update(&self, group: &GroupSession) -> Result<GroupSession, EngineError> {
            let mut entry = self
                .groups
                .get_mut(&group.id.0)
                .ok_or_else(|| EngineError::GroupSessionNotFound(group.id.0.clone()))?;
            *entry = group.clone();
            Ok(group.clone())
        }

        async fn add_participant(
            &self,
            id: &GroupSessionId,
            user_id: &UserId,
        ) -> Result<(GroupSession, bool), EngineError> {
            let mut entry = self
                .groups
                .get_mut(&id.0)
                .ok_or_else(|| EngineError::GroupSessionNotFound(id.0.clone()))?;
            let added = entry.add_participant(user_id);
            Ok((entry.clone(), added))
        }

        async fn remove_participant(
            &self,
            id: &GroupSessionId,
            user_id: &UserId,
        ) -> Result<(GroupSession, bool), EngineError> {
            let mut entry = self
                .groups
                .get_mut(&id.0)
                .ok_or_else(|| EngineError::GroupSessionNotFound(id.0.clone()))?;
            entry.remove_participant(user_id);
            let removed_last = entry.participant_ids.is_empty() && entry.is_active();
            if removed_last {
                entry
                    .complete()
                    .map_err(|e| EngineError::StateStoreError(e.to_string()))?;
            }
            Ok((entry.clone(), removed_last))
        }
    }

    #[derive(Debug, Clone)]
    struct QueueEntry {
        item: DeferredWorkItem,
        in_flight: bool,
    }

    /// Deferred work queue in a concurrent map
    #[derive(Debug, Default)]
    pub struct MemoryDeferredWorkQueue {
        entries: DashMap<String, QueueEntry>,
        failed: DashMap<String, DeferredWorkItem>,
    }

    impl MemoryDeferredWorkQueue {
        /// Create an empty queue
        pub fn new() -> Self {
            Self::default()
        }

        /// Items that exhausted their retries
        pub fn failed_items(&self) -> Vec<DeferredWorkItem> {
            self.failed.iter().map(|e| e.clone()).collect()
        }
    }

    #[async_trait]
    impl DeferredWorkQueue for MemoryDeferredWorkQueue {
        async fn enqueue(&self, item: DeferredWorkItem) -> Result<(), EngineError> {
            self.entries.insert(
                item.id.clone(),
                QueueEntry {
                    item,
                    in_flight: false,
                },
            );
            Ok(())
        }

        async fn ack(&self, id: &str) -> Result<(), EngineError> {
            self.entries.remove(id);
            Ok(())
        }

        async fn reschedule(
            &self,
            id: &str,
            due_at: DateTime<Utc>,
            attempts: u32,
        ) -> Result<(), EngineError> {
            let mut entry = self
                .entries
                .get_mut(id)
                .ok_or_else(|| EngineError::QueueError(format!("Unknown work item: {}", id)))?;
            entry.item.due_at = due_at;
            entry.item.attempts = attempts;
            entry.in_flight = false;
            Ok(())
        }

        async fn fail(&self, id: &str) -> Result<(), EngineError> {
            if let Some((_, entry)) = self.entries.remove(id) {
                self.failed.insert(id.to_string(), entry.item);
            }
            Ok(())
        }

        async fn take_due(
            &self,
            now: DateTime<Utc>,
        ) -> Result<Vec<DeferredWorkItem>, EngineError> {
            let mut due = Vec::new();
            for mut entry in self.entries.iter_mut() {
                if !entry.in_flight && entry.item.is_due(now) {
                    entry.in_flight = true;
                    due.push(entry.item.clone());
                }
            }
            due.sort_by_key(|item| item.due_at);
            Ok(due)
        }

        async fn pending(&self) -> Result<Vec<DeferredWorkItem>, EngineError> {
            Ok(self.entries.iter().map(|e| e.item.clone()).collect())
        }
    }

    /// Owner-scoped records in a concurrent map
    #[derive(Debug, Default)]
    pub struct MemoryRecordStore {
        collections: DashMap<String, Vec<StoredRecord>>,
    }

    impl MemoryRecordStore {
        /// Create an empty store
        pub fn new() -> Self {
            Self::default()
        }

        fn collection_key(owner_id: &OwnerId, collection: &str) -> String {
            format!("{}/{}", owner_id.0, collection)
        }

        fn matches(record: &StoredRecord, filter: &serde_json::Map<String, Value>) -> bool {
            filter
                .iter()
                .all(|(k, v)| record.data.get(k) == Some(v))
        }
    }

    #[async_trait]
    impl RecordStore for MemoryRecordStore {
        async fn insert(
            &self,
            owner_id: &OwnerId,
            collection: &str,
            data: Value,
        ) -> Result<StoredRecord, EngineError> {
            let now = Utc::now();
            let record = StoredRecord {
                id: Uuid::new_v4().to_string(),
                owner_id: owner_id.clone(),
                collection: collection.to_string(),
                data,
                created_at: now,
                updated_at: now,
            };
            self.collections
                .entry(Self::collection_key(owner_id, collection))
                .or_default()
                .push(record.clone());
            Ok(record)
        }

        async fn get(
            &self,
            owner_id: &OwnerId,
            collection: &str,
            id: &str,
        ) -> Result<Option<StoredRecord>, EngineError> {
            Ok(self
                .collections
                .get(&Self::collection_key(owner_id, collection))
                .and_then(|records| records.iter().find(|r| r.id == id).cloned()))
        }

        async fn find(
            &self,
            owner_id: &OwnerId,
            collection: &str,
            filter: &serde_json::Map<String, Value>,
            limit: Option<usize>,
        ) -> Result<Vec<StoredRecord>, EngineError> {
            let matches = self
                .collections
                .get(&Self::collection_key(owner_id, collection))
                .map(|records| {
                    records
                        .iter()
                        .filter(|r| Self::matches(r, filter))
                        .take(limit.unwrap_or(usize::MAX))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            Ok(matches)
        }

        async fn update_matching(
            &self,
            owner_id: &OwnerId,
            collection: &str,
            filter: &serde_json::Map<String, Value>,
            patch: &serde_json::Map<String, Value>,
        ) -> Result<usize, EngineError> {
            let mut count = 0;
            if let Some(mut records) = self
                .collections
                .get_mut(&Self::collection_key(owner_id, collection))
            {
                for record in records.iter_mut().filter(|r| Self::matches(r, filter)) {
                    if let Value::Object(data) = &mut record.data {
                        for (k, v) in patch {
                            data.insert(k.clone(), v.clone());
                        }
                    }
                    record.updated_at = Utc::now();
                    count += 1;
                }
            }
            Ok(count)
        }

        async fn delete_matching(
            &self,
            owner_id: &OwnerId,
            collection: &str,
            filter: &serde_json::Map<String, Value>,
        ) -> Result<usize, EngineError> {
            let mut count = 0;
            if let Some(mut records) = self
                .collections
                .get_mut(&Self::collection_key(owner_id, collection))
            {
                let before = records.len();
                records.retain(|r| !Self::matches(r, filter));
                count = before - records.len();
            }
            Ok(count)
        }
    }

    /// Shared state in nested maps, ignoring TTLs
    #[derive(Debug, Default)]
    pub struct MemorySharedStateStore {
        scopes: DashMap<String, HashMap<String, Value>>,
    }

    impl MemorySharedStateStore {
        /// Create an empty store
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl SharedStateStore for MemorySharedStateStore {
        async fn get(&self, scope: &str, key: &str) -> Result<Option<Value>, EngineError> {
            Ok(self
                .scopes
                .get(scope)
                .and_then(|entries| entries.get(key).cloned()))
        }

        async fn set(&self, scope: &str, key: &str, value: Value) -> Result<(), EngineError> {
            self.scopes
                .entry(scope.to_string())
                .or_default()
                .insert(key.to_string(), value);
            Ok(())
        }

        async fn delete(&self, scope: &str, key: &str) -> Result<(), EngineError> {
            if let Some(mut entries) = self.scopes.get_mut(scope) {
                entries.remove(key);
            }
            Ok(())
        }

        async fn list(&self, scope: &str) -> Result<HashMap<String, Value>, EngineError> {
            Ok(self
                .scopes
                .get(scope)
                .map(|entries| entries.clone())
                .unwrap_or_default())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::domain::flow::{FlowNode, NodeId, START_NODE_KIND};
        use serde_json::json;

        fn sample_flow(id: &str, active: bool) -> FlowDefinition {
            let mut flow = FlowDefinition::new(
                id,
                "owner-1",
                "sample",
                vec![FlowNode::new(
                    "n1",
                    FlowId(id.to_string()),
                    START_NODE_KIND,
                    json!({}),
                )],
            );
            flow.active = active;
            flow
        }

        fn sample_session(key_suffix: &str) -> Session {
            Session::new(
                FlowId("f1".to_string()),
                ChatId(format!("chat-{}", key_suffix)),
                UserId(format!("user-{}", key_suffix)),
                NodeId("n1".to_string()),
            )
        }

        #[tokio::test]
        async fn test_flow_repository_roundtrip_and_active_filter() {
            let repo = MemoryFlowDefinitionRepository::new();
            repo.save(sample_flow("f1", true)).await.unwrap();
            repo.save(sample_flow("f2", false)).await.unwrap();

            let found = repo.find_by_id(&FlowId("f1".to_string())).await.unwrap();
            assert!(found.is_some());
            assert_eq!(repo.list_active().await.unwrap().len(), 1);

            repo.set_active(&FlowId("f2".to_string()), true)
                .await
                .unwrap();
            assert_eq!(repo.list_active().await.unwrap().len(), 2);

            let missing = repo
                .set_active(&FlowId("nope".to_string()), true)
                .await;
            assert!(matches!(missing, Err(EngineError::FlowNotFound(_))));
        }

        #[tokio::test]
        async fn test_session_insert_rejects_active_occupant() {
            let repo = MemorySessionRepository::new();
            let session = sample_session("a");
            repo.insert_new(session.clone()).await.unwrap();
            let dup = repo.insert_new(session.clone()).await;
            assert!(matches!(dup, Err(EngineError::StateStoreError(_))));

            // A completed occupant is replaced
            let mut stored = repo.find(&session.session_key).await.unwrap().unwrap();
            stored.complete().unwrap();
            repo.update(&stored, 0).await.unwrap();
            repo.insert_new(sample_session("a")).await.unwrap();
        }

        #[tokio::test]
        async fn test_session_update_is_version_guarded() {
            let repo = MemorySessionRepository::new();
            let session = repo.insert_new(sample_session("b")).await.unwrap();

            let updated = repo.update(&session, 0).await.unwrap();
            assert_eq!(updated.version, 1);

            let stale = repo.update(&session, 0).await;
            assert!(matches!(stale, Err(EngineError::VersionConflict(_))));
        }

        #[tokio::test]
        async fn test_session_expiry_sweep() {
            let repo = MemorySessionRepository::new();
            let mut session = sample_session("c");
            session.last_activity_at = Utc::now() - chrono::Duration::hours(2);
            repo.insert_new(session.clone()).await.unwrap();
            repo.insert_new(sample_session("d")).await.unwrap();

            let expired = repo.expire_idle(chrono::Duration::hours(1)).await.unwrap();
            assert_eq!(expired.len(), 1);
            assert_eq!(expired[0].session_key, session.session_key);
            assert!(repo.find_active(&session.session_key).await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_group_participant_ops_are_idempotent() {
            let repo = MemoryGroupSessionRepository::new();
            let group = repo
                .insert_new(GroupSession::new(FlowId("f1".to_string()), None))
                .await
                .unwrap();
            let alice = UserId("alice".to_string());

            let (_, added) = repo.add_participant(&group.id, &alice).await.unwrap();
            assert!(added);
            let (_, added_again) = repo.add_participant(&group.id, &alice).await.unwrap();
            assert!(!added_again);

            let (after, removed_last) =
                repo.remove_participant(&group.id, &alice).await.unwrap();
            assert!(removed_last);
            assert!(!after.is_active());
        }

        #[tokio::test]
        async fn test_queue_take_due_marks_in_flight() {
            let queue = MemoryDeferredWorkQueue::new();
            let item = DeferredWorkItem::new(
                crate::domain::deferred::WorkTarget::Session {
                    session_key: SessionKey("f1:c1".to_string()),
                },
                Utc::now() - chrono::Duration::seconds(1),
                crate::domain::deferred::WorkPayload::Continue,
            );
            queue.enqueue(item.clone()).await.unwrap();

            let due = queue.take_due(Utc::now()).await.unwrap();
            assert_eq!(due.len(), 1);
            // Already in flight, not delivered twice
            assert!(queue.take_due(Utc::now()).await.unwrap().is_empty());

            queue
                .reschedule(&item.id, Utc::now() - chrono::Duration::seconds(1), 1)
                .await
                .unwrap();
            assert_eq!(queue.take_due(Utc::now()).await.unwrap().len(), 1);

            queue.fail(&item.id).await.unwrap();
            assert!(queue.pending().await.unwrap().is_empty());
            assert_eq!(queue.failed_items().len(), 1);
        }

        #[tokio::test]
        async fn test_record_store_filter_and_patch() {
            let store = MemoryRecordStore::new();
            let owner = OwnerId("owner-1".to_string());
            store
                .insert(&owner, "orders", json!({"status": "open", "total": 5}))
                .await
                .unwrap();
            store
                .insert(&owner, "orders", json!({"status": "closed", "total": 9}))
                .await
                .unwrap();

            let mut filter = serde_json::Map::new();
            filter.insert("status".to_string(), json!("open"));
            let open = store.find(&owner, "orders", &filter, None).await.unwrap();
            assert_eq!(open.len(), 1);

            let mut patch = serde_json::Map::new();
            patch.insert("status".to_string(), json!("closed"));
            let patched = store
                .update_matching(&owner, "orders", &filter, &patch)
                .await
                .unwrap();
            assert_eq!(patched, 1);
            assert!(store.find(&owner, "orders", &filter, None).await.unwrap().is_empty());

            let mut all = serde_json::Map::new();
            all.insert("status".to_string(), json!("closed"));
            let deleted = store.delete_matching(&owner, "orders", &all).await.unwrap();
            assert_eq!(deleted, 2);

            // Other owners never see the collection
            let other = OwnerId("owner-2".to_string());
            assert!(store
                .find(&other, "orders", &serde_json::Map::new(), None)
                .await
                .unwrap()
                .is_empty());
        }

        #[tokio::test]
        async fn test_shared_state_scopes_are_isolated() {
            let store = MemorySharedStateStore::new();
            store.set("user:o1:u1", "name", json!("Ada")).await.unwrap();
            store.set("global:o1", "name", json!("Everyone")).await.unwrap();

            assert_eq!(
                store.get("user:o1:u1", "name").await.unwrap(),
                Some(json!("Ada"))
            );
            assert_eq!(
                store.get("global:o1", "name").await.unwrap(),
                Some(json!("Everyone"))
            );

            store.delete("user:o1:u1", "name").await.unwrap();
            assert!(store.get("user:o1:u1", "name").await.unwrap().is_none());
            assert_eq!(store.list("global:o1").await.unwrap().len(), 1);
        }
    }
}
