//! Group session domain model
//!
//! A group session carries the shared variables and the participant set of
//! a multi-party conversation. Membership only changes through the group
//! node handlers; removing the last participant completes the group.

use crate::domain::flow::{FlowId, NodeId};
use crate::error::EngineError;
use crate::types::{UserId, VariableMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Unique identifier of a group session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupSessionId(pub String);

impl GroupSessionId {
    /// Generate a fresh identifier
    pub fn generate() -> Self {
        GroupSessionId(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for GroupSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a group session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    /// Group is running
    Active,
    /// Group finished, normally by its last participant leaving
    Completed,
    /// Completed group retained for later inspection
    Archived,
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupStatus::Active => write!(f, "active"),
            GroupStatus::Completed => write!(f, "completed"),
            GroupStatus::Archived => write!(f, "archived"),
        }
    }
}

/// Persisted state of a multi-party conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSession {
    /// Group identifier
    pub id: GroupSessionId,
    /// Flow that created the group
    pub flow_id: FlowId,
    /// Node the group coordination is anchored at, if any
    pub current_node_id: Option<NodeId>,
    /// Variables visible to every handler invocation for this group
    #[serde(default)]
    pub shared_variables: VariableMap,
    /// Participant user ids, no duplicates
    #[serde(default)]
    pub participant_ids: BTreeSet<String>,
    /// Lifecycle status
    pub status: GroupStatus,
    /// Creation time
    pub started_at: DateTime<Utc>,
    /// Completion time, set when the group finishes
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl GroupSession {
    /// Create a new active group session
    pub fn new(flow_id: FlowId, anchor_node: Option<NodeId>) -> Self {
        Self {
            id: GroupSessionId::generate(),
            flow_id,
            current_node_id: anchor_node,
            shared_variables: VariableMap::new(),
            participant_ids: BTreeSet::new(),
            status: GroupStatus::Active,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Whether the group is still running
    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == GroupStatus::Active
    }

    /// Add a participant. Returns `true` when the id was newly added;
    /// re-joining is a no-op.
    pub fn add_participant(&mut self, user_id: &UserId) -> bool {
        self.participant_ids.insert(user_id.0.clone())
    }

    /// Remove a participant. Returns `true` when the id was present.
    pub fn remove_participant(&mut self, user_id: &UserId) -> bool {
        self.participant_ids.remove(&user_id.0)
    }

    /// Mark the group completed
    pub fn complete(&mut self) -> Result<(), EngineError> {
        if !self.is_active() {
            return Err(EngineError::InvalidTransition(format!(
                "Cannot complete group session {} in status {}",
                self.id, self.status
            )));
        }
        self.status = GroupStatus::Completed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Archive a completed group
    pub fn archive(&mut self) -> Result<(), EngineError> {
        if self.status != GroupStatus::Completed {
            return Err(EngineError::InvalidTransition(format!(
                "Cannot archive group session {} in status {}",
                self.id, self.status
            )));
        }
        self.status = GroupStatus::Archived;
        Ok(())
    }
}
