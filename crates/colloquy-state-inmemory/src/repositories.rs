//! In-memory repositories for flows, sessions, groups and records
//!
//! All maps sit behind `tokio::sync::RwLock`, so every multi-step mutation
//! (optimistic update, membership change, lazy expiry) is atomic with
//! respect to concurrent callers.

use async_trait::async_trait;
use chrono::Utc;
use colloquy_core::domain::flow::{FlowDefinition, FlowId, OwnerId};
use colloquy_core::domain::group::GroupSession;
use colloquy_core::domain::repository::{
    FlowDefinitionRepository, GroupSessionRepository, RecordStore, SessionRepository, StoredRecord,
};
use colloquy_core::domain::session::Session;
use colloquy_core::types::{ChatId, UserId};
use colloquy_core::{EngineError, GroupSessionId, SessionKey};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Flow definitions keyed by id.
#[derive(Debug, Default)]
pub struct InMemoryFlowStore {
    flows: RwLock<HashMap<String, FlowDefinition>>,
}

impl InMemoryFlowStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlowDefinitionRepository for InMemoryFlowStore {
    async fn save(&self, flow: FlowDefinition) -> Result<FlowDefinition, EngineError> {
        let mut flows = self.flows.write().await;
        debug!(flow_id = %flow.id, "Storing flow definition");
        flows.insert(flow.id.0.clone(), flow.clone());
        Ok(flow)
    }

    async fn find_by_id(&self, id: &FlowId) -> Result<Option<FlowDefinition>, EngineError> {
        Ok(self.flows.read().await.get(&id.0).cloned())
    }

    async fn list_active(&self) -> Result<Vec<FlowDefinition>, EngineError> {
        Ok(self
            .flows
            .read()
            .await
            .values()
            .filter(|f| f.active)
            .cloned()
            .collect())
    }

    async fn set_active(&self, id: &FlowId, active: bool) -> Result<FlowDefinition, EngineError> {
        let mut flows = self.flows.write().await;
        let flow = flows
            .get_mut(&id.0)
            .ok_or_else(|| EngineError::FlowNotFound(id.0.clone()))?;
        flow.active = active;
        Ok(flow.clone())
    }
}

/// Sessions keyed by session key, with a lazy idle check on reads.
///
/// A session idle beyond the TTL reads as absent from `find_active` and is
/// transitioned to `Expired` in place; the periodic sweep in the engine
/// handles sessions nobody asks for.
#[derive(Debug)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: chrono::Duration,
}

impl InMemorySessionStore {
    /// Create a store with a 24 hour idle TTL
    pub fn new() -> Self {
        Self::with_ttl(chrono::Duration::hours(24))
    }

    /// Create a store with a custom idle TTL
    pub fn with_ttl(ttl: chrono::Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn expire_in_place(session: &mut Session) -> bool {
        if session.expire().is_ok() {
            session.version += 1;
            debug!(session_key = %session.session_key, "Session expired lazily");
            true
        } else {
            false
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionStore {
    async fn insert_new(&self, session: Session) -> Result<Session, EngineError> {
        let mut sessions = self.sessions.write().await;
        let key = session.session_key.0.clone();
        if let Some(existing) = sessions.get(&key) {
            if existing.is_active() {
                return Err(EngineError::StateStoreError(format!(
                    "Active session already exists for key: {}",
                    key
                )));
            }
        }
        sessions.insert(key, session.clone());
        Ok(session)
    }

    async fn find_active(&self, key: &SessionKey) -> Result<Option<Session>, EngineError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&key.0) {
            Some(session) if session.is_active() => {
                if session.is_idle(self.ttl, Utc::now()) {
                    Self::expire_in_place(session);
                    Ok(None)
                } else {
                    Ok(Some(session.clone()))
                }
            }
            _ => Ok(None),
        }
    }

    async fn find_active_by_chat(&self, chat_id: &ChatId) -> Result<Option<Session>, EngineError> {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        let mut found: Option<Session> = None;
        for session in sessions.values_mut() {
            if !session.is_active() || session.chat_id != *chat_id {
                continue;
            }
            if session.is_idle(self.ttl, now) {
                Self::expire_in_place(session);
                continue;
            }
            match &found {
                Some(best) if best.last_activity_at >= session.last_activity_at => {}
                _ => found = Some(session.clone()),
            }
        }
        Ok(found)
    }

    async fn find(&self, key: &SessionKey) -> Result<Option<Session>, EngineError> {
        Ok(self.sessions.read().await.get(&key.0).cloned())
    }

    async fn update(
        &self,
        session: &Session,
        expected_version: u64,
    ) -> Result<Session, EngineError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
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
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        let mut expired = Vec::new();
        for session in sessions.values_mut() {
            if session.is_active() && session.is_idle(ttl, now) && Self::expire_in_place(session) {
                expired.push(session.clone());
            }
        }
        Ok(expired)
    }
}

/// Group sessions keyed by id, with atomic membership changes.
#[derive(Debug, Default)]
pub struct InMemoryGroupSessionStore {
    groups: RwLock<HashMap<String, GroupSession>>,
}

impl InMemoryGroupSessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GroupSessionRepository for InMemoryGroupSessionStore {
    async fn insert_new(&self, group: GroupSession) -> Result<GroupSession, EngineError> {
        let mut groups = self.groups.write().await;
        groups.insert(group.id.0.clone(), group.clone());
        Ok(group)
    }

    async fn find(&self, id: &GroupSessionId) -> Result<Option<GroupSession>, EngineError> {
        Ok(self.groups.read().await.get(&id.0).cloned())
    }

    async fn update(&self, group: &GroupSession) -> Result<GroupSession, EngineError> {
        let mut groups = self.groups.write().await;
        let entry = groups
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
        let mut groups = self.groups.write().await;
        let entry = groups
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
        let mut groups = self.groups.write().await;
        let entry = groups
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

/// Owner-scoped record collections.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    collections: RwLock<HashMap<String, Vec<StoredRecord>>>,
}

impl InMemoryRecordStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn collection_key(owner_id: &OwnerId, collection: &str) -> String {
        format!("{}/{}", owner_id.0, collection)
    }

    fn matches(record: &StoredRecord, filter: &Map<String, Value>) -> bool {
        filter
            .iter()
            .all(|(field, expected)| record.data.get(field) == Some(expected))
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
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
        let mut collections = self.collections.write().await;
        collections
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
            .read()
            .await
            .get(&Self::collection_key(owner_id, collection))
            .and_then(|records| records.iter().find(|r| r.id == id).cloned()))
    }

    async fn find(
        &self,
        owner_id: &OwnerId,
        collection: &str,
        filter: &Map<String, Value>,
        limit: Option<usize>,
    ) -> Result<Vec<StoredRecord>, EngineError> {
        let collections = self.collections.read().await;
        let mut matches: Vec<StoredRecord> = collections
            .get(&Self::collection_key(owner_id, collection))
            .map(|records| {
                records
                    .iter()
                    .filter(|r| Self::matches(r, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(limit) = limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    async fn update_matching(
        &self,
        owner_id: &OwnerId,
        collection: &str,
        filter: &Map<String, Value>,
        patch: &Map<String, Value>,
    ) -> Result<usize, EngineError> {
        let mut collections = self.collections.write().await;
        let mut count = 0;
        if let Some(records) = collections.get_mut(&Self::collection_key(owner_id, collection)) {
            for record in records.iter_mut().filter(|r| Self::matches(r, filter)) {
                if let Value::Object(data) = &mut record.data {
                    for (field, value) in patch {
                        data.insert(field.clone(), value.clone());
                    }
                    record.updated_at = Utc::now();
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    async fn delete_matching(
        &self,
        owner_id: &OwnerId,
        collection: &str,
        filter: &Map<String, Value>,
    ) -> Result<usize, EngineError> {
        let mut collections = self.collections.write().await;
        let mut count = 0;
        if let Some(records) = collections.get_mut(&Self::collection_key(owner_id, collection)) {
            let before = records.len();
            records.retain(|r| !Self::matches(r, filter));
            count = before - records.len();
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::domain::flow::NodeId;
    use serde_json::json;

    fn sample_session(key_suffix: &str) -> Session {
        Session::new(
            FlowId(format!("flow-{key_suffix}")),
            ChatId("chat-1".to_string()),
            UserId("user-1".to_string()),
            NodeId("start".to_string()),
        )
    }

    #[tokio::test]
    async fn find_active_hides_idle_sessions_and_expires_them() {
        let store = InMemorySessionStore::with_ttl(chrono::Duration::minutes(30));
        let mut session = sample_session("a");
        session.last_activity_at = Utc::now() - chrono::Duration::hours(2);
        let key = session.session_key.clone();
        store.insert_new(session).await.unwrap();

        assert!(store.find_active(&key).await.unwrap().is_none());

        let stored = store.find(&key).await.unwrap().unwrap();
        assert_eq!(
            stored.status,
            colloquy_core::SessionStatus::Expired
        );
    }

    #[tokio::test]
    async fn find_active_by_chat_prefers_the_most_recent_session() {
        let store = InMemorySessionStore::new();
        let mut older = sample_session("old");
        older.last_activity_at = Utc::now() - chrono::Duration::minutes(10);
        let newer = sample_session("new");
        store.insert_new(older).await.unwrap();
        store.insert_new(newer.clone()).await.unwrap();

        let found = store
            .find_active_by_chat(&ChatId("chat-1".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.session_key, newer.session_key);
    }

    #[tokio::test]
    async fn update_enforces_the_expected_version() {
        let store = InMemorySessionStore::new();
        let session = store.insert_new(sample_session("v")).await.unwrap();

        let updated = store.update(&session, 0).await.unwrap();
        assert_eq!(updated.version, 1);

        let err = store.update(&session, 0).await.unwrap_err();
        assert!(matches!(err, EngineError::VersionConflict(_)));
    }

    #[tokio::test]
    async fn terminal_sessions_can_be_replaced_but_active_ones_cannot() {
        let store = InMemorySessionStore::new();
        let session = store.insert_new(sample_session("r")).await.unwrap();

        let err = store.insert_new(sample_session("r")).await.unwrap_err();
        assert!(matches!(err, EngineError::StateStoreError(_)));

        let mut done = session.clone();
        done.complete().unwrap();
        store.update(&done, 0).await.unwrap();
        store.insert_new(sample_session("r")).await.unwrap();
    }

    #[tokio::test]
    async fn removing_the_last_participant_completes_the_group() {
        let store = InMemoryGroupSessionStore::new();
        let mut group = GroupSession::new(FlowId("flow-1".to_string()), None);
        group.add_participant(&UserId("ada".to_string()));
        let id = group.id.clone();
        store.insert_new(group).await.unwrap();

        let (after, added) = store
            .add_participant(&id, &UserId("ada".to_string()))
            .await
            .unwrap();
        assert!(!added, "re-join must be a no-op");
        assert_eq!(after.participant_ids.len(), 1);

        let (after, removed_last) = store
            .remove_participant(&id, &UserId("ada".to_string()))
            .await
            .unwrap();
        assert!(removed_last);
        assert!(!after.is_active());
    }

    #[tokio::test]
    async fn record_store_filters_patches_and_deletes() {
        let store = InMemoryRecordStore::new();
        let owner = OwnerId("owner-1".to_string());
        store
            .insert(&owner, "pets", json!({"kind": "cat", "name": "Miso"}))
            .await
            .unwrap();
        store
            .insert(&owner, "pets", json!({"kind": "dog", "name": "Rex"}))
            .await
            .unwrap();

        let mut filter = Map::new();
        filter.insert("kind".to_string(), json!("cat"));
        let cats = store.find(&owner, "pets", &filter, None).await.unwrap();
        assert_eq!(cats.len(), 1);

        let mut patch = Map::new();
        patch.insert("fed".to_string(), json!(true));
        assert_eq!(
            store
                .update_matching(&owner, "pets", &filter, &patch)
                .await
                .unwrap(),
            1
        );
        let cats = store.find(&owner, "pets", &filter, None).await.unwrap();
        assert_eq!(cats[0].data["fed"], json!(true));

        assert_eq!(store.delete_matching(&owner, "pets", &filter).await.unwrap(), 1);
        assert!(store.find(&owner, "pets", &filter, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn flow_store_round_trips_and_toggles() {
        let store = InMemoryFlowStore::new();
        let flow = FlowDefinition::new(
            "flow-1",
            "owner-1",
            "test",
            vec![],
        );
        store.save(flow).await.unwrap();

        assert_eq!(store.list_active().await.unwrap().len(), 1);
        let off = store
            .set_active(&FlowId("flow-1".to_string()), false)
            .await
            .unwrap();
        assert!(!off.active);
        assert!(store.list_active().await.unwrap().is_empty());

        let err = store
            .set_active(&FlowId("missing".to_string()), true)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::FlowNotFound(_)));
    }
}
