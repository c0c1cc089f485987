//! Individual session domain model
//!
//! A session is the persisted execution cursor plus variable bag for one
//! conversation. It is created on the first matching inbound event, mutated
//! by every engine step, and moves monotonically from `Active` to either
//! `Completed` or `Expired`; terminal sessions are immutable and a fresh
//! session takes over the same key for further interaction.

use crate::domain::flow::{FlowId, NodeId};
use crate::domain::group::GroupSessionId;
use crate::error::EngineError;
use crate::types::{ChatId, UserId, VariableMap};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique key of a session, derived from the flow and the chat
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey(pub String);

impl SessionKey {
    /// Derive the key for a flow/chat pair
    pub fn derive(flow_id: &FlowId, chat_id: &ChatId) -> Self {
        SessionKey(format!("{}:{}", flow_id, chat_id))
    }

    /// The key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session is progressing through its flow
    Active,
    /// Session reached a terminal node
    Completed,
    /// Session idled beyond the configured TTL
    Expired,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Expired => write!(f, "expired"),
        }
    }
}

/// Persisted execution state of one individual conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique key, derived from flow and chat
    pub session_key: SessionKey,
    /// Flow this session executes
    pub flow_id: FlowId,
    /// Chat the conversation happens in
    pub chat_id: ChatId,
    /// User driving the conversation
    pub user_id: UserId,
    /// Node the engine will execute next; `None` only transiently
    pub current_node_id: Option<NodeId>,
    /// Session-scoped variables
    #[serde(default)]
    pub variables: VariableMap,
    /// Group session this session is attached to, if any
    #[serde(default)]
    pub group_id: Option<GroupSessionId>,
    /// Lifecycle status
    pub status: SessionStatus,
    /// Last recorded step failure; the session stays active
    #[serde(default)]
    pub error: Option<String>,
    /// Optimistic concurrency version, bumped by the store on update
    pub version: u64,
    /// Creation time
    pub started_at: DateTime<Utc>,
    /// Last engine activity, drives idle expiry
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    /// Create a new active session positioned at the flow's start node
    pub fn new(flow_id: FlowId, chat_id: ChatId, user_id: UserId, start_node: NodeId) -> Self {
        let now = Utc::now();
        Self {
            session_key: SessionKey::derive(&flow_id, &chat_id),
            flow_id,
            chat_id,
            user_id,
            current_node_id: Some(start_node),
            variables: VariableMap::new(),
            group_id: None,
            status: SessionStatus::Active,
            error: None,
            version: 0,
            started_at: now,
            last_activity_at: now,
        }
    }

    /// Whether the session is still progressing
    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Move the cursor to a node, clearing any recorded error
    pub fn advance_to(&mut self, node: NodeId) {
        self.current_node_id = Some(node);
        self.error = None;
        self.touch();
    }

    /// Mark the session completed
    pub fn complete(&mut self) -> Result<(), EngineError> {
        if !self.is_active() {
            return Err(EngineError::InvalidTransition(format!(
                "Cannot complete session {} in status {}",
                self.session_key, self.status
            )));
        }
        self.status = SessionStatus::Completed;
        self.touch();
        Ok(())
    }

    /// Mark the session expired
    pub fn expire(&mut self) -> Result<(), EngineError> {
        if !self.is_active() {
            return Err(EngineError::InvalidTransition(format!(
                "Cannot expire session {} in status {}",
                self.session_key, self.status
            )));
        }
        self.status = SessionStatus::Expired;
        self.touch();
        Ok(())
    }

    /// Record a step failure without leaving the active status
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.touch();
    }

    /// Refresh the activity timestamp
    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    /// Whether the session has been inactive for at least `idle_for`
    pub fn is_idle(&self, idle_for: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_activity_at >= idle_for
    }
}
