//!
//! Colloquy Core - Execution engine for the Colloquy conversation platform
//!
//! This crate defines the domain model, the node handler contract, and the
//! engine that drives chat sessions through flow graphs. Node handlers and
//! storage backends live in other crates and plug in through the traits
//! defined here.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Application services - engine, dispatch, deferred worker
pub mod application;

/// Engine configuration
pub mod config;

/// Domain layer - flows, sessions, groups, deferred work
pub mod domain;

/// Error types
pub mod error;

/// Handler registry
pub mod registry;

/// Core message and variable types
pub mod types;

// Re-export key types
pub use error::EngineError;
pub use registry::HandlerRegistry;
pub use types::{ChatId, InboundEvent, Keyboard, KeyboardButton, MessageBody, OutboundMessage,
    UserId, VariableMap};

pub use domain::deferred::{DeferredWorkItem, WorkPayload, WorkTarget};
pub use domain::events::{ActivityEvent, ActivitySink, ActivityTarget, SessionNotification,
    SessionNotifier};
pub use domain::flow::{EntryTrigger, FlowDefinition, FlowId, FlowNode, NodeId, OwnerId};
pub use domain::group::{GroupSession, GroupSessionId, GroupStatus};
pub use domain::repository::{
    DeferredWorkQueue, FlowDefinitionRepository, GroupSessionRepository, RecordStore,
    SessionRepository, SharedStateStore, StoredRecord,
};
pub use domain::session::{Session, SessionKey, SessionStatus};

// Application interfaces
pub use application::dispatch::ChannelAdapter;
pub use application::engine::{EngineReport, EngineStores, FlowEngine};
pub use application::runtime::EngineRuntime;
pub use application::worker::DeferredWorker;
pub use config::EngineConfig;

/// What caused a handler invocation
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// A fresh inbound chat event
    Message(InboundEvent),
    /// Resumption of deferred work
    Resume(WorkPayload),
    /// Automatic continuation within one engine pass
    Continuation,
}

impl Trigger {
    /// The inbound event, when the trigger carries one
    pub fn inbound(&self) -> Option<&InboundEvent> {
        match self {
            Trigger::Message(event) => Some(event),
            _ => None,
        }
    }

    /// Whether this is a deferred-work resumption
    pub fn is_resume(&self) -> bool {
        matches!(self, Trigger::Resume(_))
    }
}

/// Where a variable write lands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarScope {
    /// The session's own variables
    Session,
    /// The group session's shared variables
    Shared,
    /// Per-user variables, surviving across sessions
    User,
    /// Owner-wide variables, visible to every session
    Global,
}

/// One variable mutation
#[derive(Debug, Clone, PartialEq)]
pub enum VarOp {
    /// Set a key in a scope
    Set {
        /// Target scope
        scope: VarScope,
        /// Variable name
        key: String,
        /// New value
        value: Value,
    },
    /// Remove a key from a scope
    Remove {
        /// Target scope
        scope: VarScope,
        /// Variable name
        key: String,
    },
}

/// Ordered set of variable mutations produced by one handler invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariablesPatch(pub Vec<VarOp>);

impl VariablesPatch {
    /// An empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a set operation
    pub fn set(mut self, scope: VarScope, key: impl Into<String>, value: Value) -> Self {
        self.0.push(VarOp::Set {
            scope,
            key: key.into(),
            value,
        });
        self
    }

    /// Append a remove operation
    pub fn remove(mut self, scope: VarScope, key: impl Into<String>) -> Self {
        self.0.push(VarOp::Remove {
            scope,
            key: key.into(),
        });
        self
    }

    /// Whether the patch holds no operations
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate the operations in order
    pub fn iter(&self) -> impl Iterator<Item = &VarOp> {
        self.0.iter()
    }
}

/// What a paused session is waiting for
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeCondition {
    /// A scheduled point in time
    Timer {
        /// When to resume
        due_at: DateTime<Utc>,
    },
    /// The next inbound user event
    Input,
}

/// Where execution goes after a handler finishes
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Continue at a specific node
    Goto(NodeId),
    /// Continue along the true or false edge of the current node
    Branch(bool),
    /// Stop on the current node until the condition is met
    Pause(ResumeCondition),
    /// The flow is finished
    Terminal,
}

/// Deferred work a handler wants scheduled
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredSpec {
    /// When the work is due
    pub due_at: DateTime<Utc>,
    /// What to do when due
    pub payload: WorkPayload,
    /// Route to this group session instead of the current session
    pub target_group: Option<GroupSessionId>,
}

/// Group membership change a handler wants applied
#[derive(Debug, Clone, PartialEq)]
pub enum GroupCommand {
    /// Create a new group session with the current user as first member
    Create {
        /// Optional node the group session anchors on
        anchor_node: Option<NodeId>,
        /// Session variable that receives the new group id
        result_variable: String,
    },
    /// Join an existing group session
    Join {
        /// Group to join
        group_id: GroupSessionId,
    },
    /// Leave the current group session
    Leave,
}

/// Everything a handler invocation produced
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    /// Variable mutations, applied before the transition
    pub patch: VariablesPatch,
    /// Messages to send after state is durably written
    pub effects: Vec<OutboundMessage>,
    /// Where execution goes next
    pub transition: Transition,
    /// Work to schedule for later
    pub deferred: Option<DeferredSpec>,
    /// Group membership change to apply
    pub group: Option<GroupCommand>,
}

impl NodeOutcome {
    fn with_transition(transition: Transition) -> Self {
        Self {
            patch: VariablesPatch::new(),
            effects: Vec::new(),
            transition,
            deferred: None,
            group: None,
        }
    }

    /// Continue at a specific node
    pub fn goto(next: NodeId) -> Self {
        Self::with_transition(Transition::Goto(next))
    }

    /// Continue along a boolean edge
    pub fn branch(which: bool) -> Self {
        Self::with_transition(Transition::Branch(which))
    }

    /// Pause on the current node
    pub fn pause(condition: ResumeCondition) -> Self {
        Self::with_transition(Transition::Pause(condition))
    }

    /// Finish the flow
    pub fn terminal() -> Self {
        Self::with_transition(Transition::Terminal)
    }

    /// Add an outbound message
    pub fn with_effect(mut self, effect: OutboundMessage) -> Self {
        self.effects.push(effect);
        self
    }

    /// Replace the variables patch
    pub fn with_patch(mut self, patch: VariablesPatch) -> Self {
        self.patch = patch;
        self
    }

    /// Schedule deferred work
    pub fn with_deferred(mut self, spec: DeferredSpec) -> Self {
        self.deferred = Some(spec);
        self
    }

    /// Apply a group membership change
    pub fn with_group_command(mut self, command: GroupCommand) -> Self {
        self.group = Some(command);
        self
    }
}

/// Read-only view of the executing session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    /// Session key
    pub session_key: SessionKey,
    /// Flow being executed
    pub flow_id: FlowId,
    /// Chat the session belongs to
    pub chat_id: ChatId,
    /// User driving the session
    pub user_id: UserId,
    /// Session variables
    pub variables: VariableMap,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        Self {
            session_key: session.session_key.clone(),
            flow_id: session.flow_id.clone(),
            chat_id: session.chat_id.clone(),
            user_id: session.user_id.clone(),
            variables: session.variables.clone(),
        }
    }
}

/// Read-only view of the session's group, when it has one
#[derive(Debug, Clone, PartialEq)]
pub struct GroupView {
    /// Group identifier
    pub id: GroupSessionId,
    /// Shared variables
    pub shared_variables: VariableMap,
    /// Current members
    pub participant_ids: BTreeSet<String>,
}

impl From<&GroupSession> for GroupView {
    fn from(group: &GroupSession) -> Self {
        Self {
            id: group.id.clone(),
            shared_variables: group.shared_variables.clone(),
            participant_ids: group.participant_ids.clone(),
        }
    }
}

/// Execution context handed to a node handler
#[derive(Clone)]
pub struct NodeContext {
    /// Account that owns the flow
    pub owner_id: OwnerId,
    /// Node being executed
    pub node_id: NodeId,
    /// The executing session
    pub session: SessionView,
    /// The session's group, when it has one
    pub group: Option<GroupView>,
    /// Per-user variables
    pub user_vars: VariableMap,
    /// Owner-wide variables
    pub global_vars: VariableMap,
    records: Arc<dyn RecordStore>,
}

impl NodeContext {
    /// Build a context for one handler invocation
    pub fn new(
        owner_id: OwnerId,
        node_id: NodeId,
        session: SessionView,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            owner_id,
            node_id,
            session,
            group: None,
            user_vars: VariableMap::new(),
            global_vars: VariableMap::new(),
            records,
        }
    }

    /// Attach the group view
    pub fn with_group(mut self, group: GroupView) -> Self {
        self.group = Some(group);
        self
    }

    /// Attach per-user variables
    pub fn with_user_vars(mut self, vars: VariableMap) -> Self {
        self.user_vars = vars;
        self
    }

    /// Attach owner-wide variables
    pub fn with_global_vars(mut self, vars: VariableMap) -> Self {
        self.global_vars = vars;
        self
    }

    /// Resolve a variable, searching session, then group shared, then user,
    /// then global scope
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.session.variables.get(name) {
            return Some(value.clone());
        }
        if let Some(group) = &self.group {
            if let Some(value) = group.shared_variables.get(name) {
                return Some(value.clone());
            }
        }
        if let Some(value) = self.user_vars.get(name) {
            return Some(value.clone());
        }
        self.global_vars.get(name).cloned()
    }

    /// Render `{name}` placeholders in a template against [`lookup`]
    ///
    /// [`lookup`]: NodeContext::lookup
    pub fn render(&self, template: &str) -> String {
        types::render_template(template, |name| self.lookup(name))
    }

    /// Owner-scoped record storage
    pub fn records(&self) -> Arc<dyn RecordStore> {
        self.records.clone()
    }
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("owner_id", &self.owner_id)
            .field("node_id", &self.node_id)
            .field("session", &self.session)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

/// A handler for one node kind
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// The kind this handler serves
    fn kind(&self) -> &str;

    /// Whether the engine must stop and wait for user input before
    /// executing a node of this kind
    fn awaits_input(&self) -> bool {
        false
    }

    /// Execute one node. `config` is the node's raw configuration object.
    async fn execute(
        &self,
        ctx: &NodeContext,
        config: &Value,
        trigger: &Trigger,
    ) -> Result<NodeOutcome, EngineError>;
}

impl std::fmt::Debug for dyn NodeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandler")
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::memory::MemoryRecordStore;
    use serde_json::json;

    fn sample_view() -> SessionView {
        let mut variables = VariableMap::new();
        variables.set("name", json!("Ada"));
        variables.set("count", json!(3));
        SessionView {
            session_key: SessionKey("f1:c1".to_string()),
            flow_id: FlowId("f1".to_string()),
            chat_id: ChatId("c1".to_string()),
            user_id: UserId("u1".to_string()),
            variables,
        }
    }

    fn sample_context() -> NodeContext {
        NodeContext::new(
            OwnerId("owner-1".to_string()),
            NodeId("n1".to_string()),
            sample_view(),
            Arc::new(MemoryRecordStore::new()),
        )
    }

    #[test]
    fn test_outcome_builders() {
        let outcome = NodeOutcome::goto(NodeId("n2".to_string()))
            .with_effect(OutboundMessage::text(ChatId("c1".to_string()), "hi"))
            .with_patch(VariablesPatch::new().set(VarScope::Session, "k", json!(1)));

        assert_eq!(outcome.transition, Transition::Goto(NodeId("n2".to_string())));
        assert_eq!(outcome.effects.len(), 1);
        assert_eq!(outcome.patch.0.len(), 1);
        assert!(outcome.deferred.is_none());
        assert!(outcome.group.is_none());

        assert_eq!(NodeOutcome::terminal().transition, Transition::Terminal);
        assert_eq!(NodeOutcome::branch(true).transition, Transition::Branch(true));
    }

    #[test]
    fn test_patch_preserves_order() {
        let patch = VariablesPatch::new()
            .set(VarScope::Session, "a", json!(1))
            .remove(VarScope::User, "b")
            .set(VarScope::Global, "c", json!("x"));

        let ops: Vec<_> = patch.iter().collect();
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0], VarOp::Set { scope: VarScope::Session, .. }));
        assert!(matches!(ops[1], VarOp::Remove { scope: VarScope::User, .. }));
    }

    #[test]
    fn test_context_lookup_precedence() {
        let mut shared = VariableMap::new();
        shared.set("name", json!("Group"));
        shared.set("topic", json!("rust"));
        let mut user = VariableMap::new();
        user.set("topic", json!("user-topic"));
        user.set("tier", json!("gold"));
        let mut global = VariableMap::new();
        global.set("tier", json!("basic"));
        global.set("motd", json!("welcome"));

        let ctx = sample_context()
            .with_group(GroupView {
                id: GroupSessionId("g1".to_string()),
                shared_variables: shared,
                participant_ids: BTreeSet::new(),
            })
            .with_user_vars(user)
            .with_global_vars(global);

        // Session wins over group, group over user, user over global
        assert_eq!(ctx.lookup("name"), Some(json!("Ada")));
        assert_eq!(ctx.lookup("topic"), Some(json!("rust")));
        assert_eq!(ctx.lookup("tier"), Some(json!("gold")));
        assert_eq!(ctx.lookup("motd"), Some(json!("welcome")));
        assert_eq!(ctx.lookup("missing"), None);
    }

    #[test]
    fn test_context_render() {
        let ctx = sample_context();
        assert_eq!(ctx.render("Hello {name}, {count} left"), "Hello Ada, 3 left");
        assert_eq!(ctx.render("{unknown} stays"), "{unknown} stays");
    }

    #[test]
    fn test_trigger_helpers() {
        let event = InboundEvent::message("c1", "u1", "hi");
        let trigger = Trigger::Message(event.clone());
        assert_eq!(trigger.inbound(), Some(&event));
        assert!(!trigger.is_resume());
        assert!(Trigger::Resume(WorkPayload::Continue).is_resume());
        assert!(Trigger::Continuation.inbound().is_none());
    }
}
