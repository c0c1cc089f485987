//! Flow execution engine
//!
//! Drives sessions through flow graphs: resolves an inbound event to a
//! session, serializes work per session key, steps node handlers under a
//! bounded budget, persists the session once per pass, and only then sends
//! outbound effects. Deferred-work resumption runs through the same loop.

use crate::application::dispatch::{ChannelAdapter, EffectDispatcher};
use crate::application::locks::{group_lock_key, session_lock_key, SessionLocks};
use crate::config::EngineConfig;
use crate::domain::deferred::{DeferredWorkItem, WorkPayload, WorkTarget};
use crate::domain::events::{
    kind, ActivityEvent, ActivitySink, ActivityTarget, SessionNotification, SessionNotifier,
};
use crate::domain::flow::{FlowDefinition, FlowId, FlowNode, NodeId, OwnerId};
use crate::domain::group::{GroupSession, GroupSessionId};
use crate::domain::repository::{
    global_scope, user_scope, DeferredWorkQueue, FlowDefinitionRepository, GroupSessionRepository,
    RecordStore, SessionRepository, SharedStateStore,
};
use crate::domain::session::{Session, SessionKey, SessionStatus};
use crate::error::EngineError;
use crate::registry::HandlerRegistry;
use crate::types::{ChatId, InboundEvent, OutboundMessage, VariableMap};
use crate::{
    GroupCommand, GroupView, NodeContext, SessionView, Transition, Trigger, VarOp, VarScope,
    VariablesPatch,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// The stores the engine persists through
#[derive(Clone)]
pub struct EngineStores {
    /// Flow definitions
    pub flows: Arc<dyn FlowDefinitionRepository>,
    /// Individual sessions
    pub sessions: Arc<dyn SessionRepository>,
    /// Group sessions
    pub groups: Arc<dyn GroupSessionRepository>,
    /// Deferred work queue
    pub queue: Arc<dyn DeferredWorkQueue>,
    /// Owner-scoped records
    pub records: Arc<dyn RecordStore>,
    /// User and global variables, dispatch dedupe marks
    pub shared: Arc<dyn SharedStateStore>,
}

/// Summary of one engine pass
#[derive(Debug, Clone, PartialEq)]
pub struct EngineReport {
    /// Session the pass ran for, when one was involved
    pub session_key: Option<SessionKey>,
    /// Group the pass touched, when one was involved
    pub group_id: Option<GroupSessionId>,
    /// Session status after the pass
    pub status: Option<SessionStatus>,
    /// Nodes executed
    pub steps: u32,
    /// Messages delivered to the channel
    pub effects_sent: usize,
    /// Whether the event was dropped without touching a session
    pub ignored: bool,
}

impl EngineReport {
    fn ignored() -> Self {
        Self {
            session_key: None,
            group_id: None,
            status: None,
            steps: 0,
            effects_sent: 0,
            ignored: true,
        }
    }
}

// What one node execution decided
enum StepFate {
    Advance(NodeId),
    Pause,
    Terminal,
    Fail(EngineError),
}

// Whether an advance keeps stepping in this pass
enum Advance {
    Continue,
    Stop,
    Errored,
}

/// The flow execution engine
pub struct FlowEngine {
    stores: EngineStores,
    registry: Arc<HandlerRegistry>,
    dispatcher: EffectDispatcher,
    activity: Arc<dyn ActivitySink>,
    notifier: Arc<SessionNotifier>,
    locks: SessionLocks,
    config: EngineConfig,
}

impl FlowEngine {
    /// Create an engine over the given stores, handlers, and channel
    pub fn new(
        stores: EngineStores,
        registry: Arc<HandlerRegistry>,
        channel: Arc<dyn ChannelAdapter>,
        activity: Arc<dyn ActivitySink>,
        config: EngineConfig,
    ) -> Self {
        let dispatcher = EffectDispatcher::new(
            channel,
            stores.shared.clone(),
            config.dedupe_ttl_seconds.saturating_mul(1000),
        );
        Self {
            stores,
            registry,
            dispatcher,
            activity: activity.clone(),
            notifier: Arc::new(SessionNotifier::default()),
            locks: SessionLocks::new(),
            config,
        }
    }

    /// The stores this engine runs over
    pub fn stores(&self) -> &EngineStores {
        &self.stores
    }

    /// The activity sink events are recorded through
    pub fn activity(&self) -> Arc<dyn ActivitySink> {
        self.activity.clone()
    }

    /// The notifier session state changes are published on
    pub fn notifier(&self) -> Arc<SessionNotifier> {
        self.notifier.clone()
    }

    /// The configuration this engine runs with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Process one inbound chat event. Events that resolve to no session
    /// and match no entry trigger are ignored.
    pub async fn handle_event(&self, event: InboundEvent) -> Result<EngineReport, EngineError> {
        // Two passes cover the race where the resolved session ends between
        // resolution and lock acquisition.
        for _ in 0..2 {
            let Some(flow_id) = self.resolve_flow(&event).await? else {
                debug!(chat_id = %event.chat_id, "No active session or matching entry trigger");
                return Ok(EngineReport::ignored());
            };
            let key = SessionKey::derive(&flow_id, &event.chat_id);
            let guard = self.locks.acquire(&session_lock_key(&key)).await;

            let session = match self.stores.sessions.find_active(&key).await? {
                Some(session) => Some(session),
                None => {
                    // Create only when the event itself selects this flow
                    if self.match_entry_trigger(&event).await?.as_ref() == Some(&flow_id) {
                        Some(self.start_session(&flow_id, &event).await?)
                    } else {
                        None
                    }
                }
            };

            match session {
                Some(session) => {
                    return self
                        .run_session(session, Trigger::Message(event.clone()), None)
                        .await;
                }
                None => drop(guard),
            }
        }
        debug!(chat_id = %event.chat_id, "Session resolution kept changing, event dropped");
        Ok(EngineReport::ignored())
    }

    /// Process one due deferred work item
    pub async fn resume(&self, item: &DeferredWorkItem) -> Result<EngineReport, EngineError> {
        match &item.target {
            WorkTarget::Session { session_key } => {
                let _guard = self.locks.acquire(&session_lock_key(session_key)).await;
                let session = match self.stores.sessions.find_active(session_key).await? {
                    Some(session) => session,
                    None => {
                        debug!(session_key = %session_key, "Deferred work for inactive session");
                        return Ok(EngineReport::ignored());
                    }
                };
                self.run_session(
                    session,
                    Trigger::Resume(item.payload.clone()),
                    Some(item.idempotency_key.clone()),
                )
                .await
            }
            WorkTarget::Group { group_id } => self.resume_group(group_id, item).await,
        }
    }

    /// Expire every session idle beyond the configured TTL
    pub async fn expire_idle(&self) -> Result<Vec<Session>, EngineError> {
        let ttl = chrono::Duration::seconds(self.config.session_ttl_seconds as i64);
        let expired = self.stores.sessions.expire_idle(ttl).await?;
        for session in &expired {
            self.activity
                .record(ActivityEvent::info(
                    kind::SESSION_EXPIRED,
                    ActivityTarget::session(&session.session_key),
                    format!(
                        "Session expired after {}s without activity",
                        self.config.session_ttl_seconds
                    ),
                ))
                .await;
            self.publish_session(session);
        }
        Ok(expired)
    }

    async fn resolve_flow(&self, event: &InboundEvent) -> Result<Option<FlowId>, EngineError> {
        if let Some(session) = self.stores.sessions.find_active_by_chat(&event.chat_id).await? {
            return Ok(Some(session.flow_id));
        }
        self.match_entry_trigger(event).await
    }

    async fn match_entry_trigger(
        &self,
        event: &InboundEvent,
    ) -> Result<Option<FlowId>, EngineError> {
        let mut active = self.stores.flows.list_active().await?;
        // Deterministic pick when several flows match
        active.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Ok(active
            .into_iter()
            .find(|flow| flow.entry.matches(event))
            .map(|flow| flow.id))
    }

    async fn start_session(
        &self,
        flow_id: &FlowId,
        event: &InboundEvent,
    ) -> Result<Session, EngineError> {
        let flow = self
            .stores
            .flows
            .find_by_id(flow_id)
            .await?
            .ok_or_else(|| EngineError::FlowNotFound(flow_id.0.clone()))?;
        if !flow.active {
            self.activity
                .record(ActivityEvent::warn(
                    kind::FLOW_INACTIVE,
                    ActivityTarget::flow(flow_id),
                    "Refusing to start a session on an inactive flow",
                ))
                .await;
            return Err(EngineError::FlowInactive(flow_id.0.clone()));
        }
        let start = flow.start_node().ok_or_else(|| {
            EngineError::InvalidConfiguration(format!("Flow {} has no start node", flow_id))
        })?;

        let session = Session::new(
            flow.id.clone(),
            event.chat_id.clone(),
            event.user_id.clone(),
            start.id.clone(),
        );
        let session = self.stores.sessions.insert_new(session).await?;
        self.activity
            .record(ActivityEvent::info(
                kind::SESSION_STARTED,
                ActivityTarget::session(&session.session_key),
                format!("Session started on flow {} for {}", flow.id, session.user_id),
            ))
            .await;
        Ok(session)
    }

    // One full pass over a session: step handlers until the session pauses,
    // finishes, errors, or runs out of budget; then persist, enqueue, send.
    async fn run_session(
        &self,
        mut session: Session,
        mut trigger: Trigger,
        idempotency: Option<String>,
    ) -> Result<EngineReport, EngineError> {
        let base_version = session.version;
        let target = ActivityTarget::session(&session.session_key);
        let mut effects: Vec<OutboundMessage> = Vec::new();
        let mut minted: Vec<DeferredWorkItem> = Vec::new();
        let mut activities: Vec<ActivityEvent> = Vec::new();
        let mut steps: u32 = 0;

        loop {
            if steps >= self.config.max_steps_per_event {
                session.record_error("step budget exceeded");
                activities.push(ActivityEvent::error(
                    kind::STEP_BUDGET_EXCEEDED,
                    target.clone(),
                    format!("Stopped after {} steps without reaching a pause", steps),
                ));
                break;
            }

            // Deactivation takes effect between steps, not at session start
            let flow = match self.stores.flows.find_by_id(&session.flow_id).await? {
                Some(flow) => flow,
                None => {
                    session.record_error("flow not found");
                    activities.push(ActivityEvent::error(
                        kind::FLOW_INACTIVE,
                        target.clone(),
                        format!("Flow {} no longer exists", session.flow_id),
                    ));
                    break;
                }
            };
            if !flow.active {
                session.record_error("flow inactive");
                activities.push(ActivityEvent::error(
                    kind::FLOW_INACTIVE,
                    target.clone(),
                    format!("Flow {} is deactivated", session.flow_id),
                ));
                break;
            }

            let Some(node_id) = session.current_node_id.clone() else {
                session.record_error("session has no current node");
                activities.push(ActivityEvent::error(
                    kind::SESSION_ERRORED,
                    target.clone(),
                    "Session has no current node",
                ));
                break;
            };
            let node = match flow.node(&node_id) {
                Some(node) => node.clone(),
                None => {
                    session.record_error(format!("node not found: {}", node_id));
                    activities.push(ActivityEvent::error(
                        kind::SESSION_ERRORED,
                        target.clone(),
                        format!("Node {} not found in flow {}", node_id, flow.id),
                    ));
                    break;
                }
            };

            // Unknown kinds fail the session outright; error edges are for
            // handler failures, not for missing handlers
            let handler = match self.registry.get(&node.kind) {
                Ok(handler) => handler,
                Err(e) => {
                    session.record_error(e.to_string());
                    activities.push(
                        ActivityEvent::error(kind::SESSION_ERRORED, target.clone(), e.to_string())
                            .with_metadata(json!({"node": node_id.0, "kind": node.kind})),
                    );
                    break;
                }
            };

            let ctx = self.build_context(&session, &flow.owner_id, &node).await?;
            steps += 1;

            let fate = match handler.execute(&ctx, &node.configuration, &trigger).await {
                Ok(outcome) => {
                    match self
                        .apply_outcome(
                            &mut session,
                            &flow.owner_id,
                            outcome,
                            &mut effects,
                            &mut minted,
                            &mut activities,
                        )
                        .await
                    {
                        Ok(Transition::Goto(next)) => StepFate::Advance(next),
                        Ok(Transition::Branch(which)) => match node.branch_target(which) {
                            Some(next) => StepFate::Advance(next),
                            None => StepFate::Fail(EngineError::InvalidConfiguration(format!(
                                "Node {} has no {} edge",
                                node.id,
                                if which { "true" } else { "false" }
                            ))),
                        },
                        Ok(Transition::Pause(_)) => StepFate::Pause,
                        Ok(Transition::Terminal) => StepFate::Terminal,
                        Err(e) => StepFate::Fail(e),
                    }
                }
                Err(e) => StepFate::Fail(e),
            };

            match fate {
                StepFate::Advance(next) => {
                    match self.advance(&mut session, &flow, next, &mut activities) {
                        Advance::Continue => trigger = Trigger::Continuation,
                        Advance::Stop | Advance::Errored => break,
                    }
                }
                StepFate::Pause => {
                    session.touch();
                    break;
                }
                StepFate::Terminal => {
                    match session.complete() {
                        Ok(()) => activities.push(ActivityEvent::info(
                            kind::SESSION_COMPLETED,
                            target.clone(),
                            format!("Flow {} finished after {} steps", session.flow_id, steps),
                        )),
                        Err(e) => session.record_error(e.to_string()),
                    }
                    break;
                }
                StepFate::Fail(e) => {
                    let error_edge = node
                        .error_node_id()
                        .filter(|next| flow.node(next).is_some());
                    match error_edge {
                        Some(next) => {
                            activities.push(
                                ActivityEvent::warn(
                                    kind::NODE_FAILED,
                                    target.clone(),
                                    format!("Node {} failed, following error edge: {}", node.id, e),
                                )
                                .with_metadata(
                                    json!({"node": node.id.0, "kind": node.kind}),
                                ),
                            );
                            match self.advance(&mut session, &flow, next, &mut activities) {
                                Advance::Continue => trigger = Trigger::Continuation,
                                Advance::Stop | Advance::Errored => break,
                            }
                        }
                        None => {
                            session.record_error(e.to_string());
                            activities.push(
                                ActivityEvent::error(
                                    kind::SESSION_ERRORED,
                                    target.clone(),
                                    format!("Node {} failed: {}", node.id, e),
                                )
                                .with_metadata(
                                    json!({"node": node.id.0, "kind": node.kind}),
                                ),
                            );
                            break;
                        }
                    }
                }
            }
        }

        // Persist before anything leaves the process
        let stored = self.stores.sessions.update(&session, base_version).await?;
        for item in minted {
            self.stores.queue.enqueue(item).await?;
        }
        let effects_sent = self.dispatcher.dispatch(effects, idempotency.as_deref()).await;
        for event in activities {
            self.activity.record(event).await;
        }
        self.publish_session(&stored);

        Ok(EngineReport {
            session_key: Some(stored.session_key.clone()),
            group_id: stored.group_id.clone(),
            status: Some(stored.status),
            steps,
            effects_sent,
            ignored: false,
        })
    }

    // Move the cursor, stopping the pass before an input-awaiting node runs
    fn advance(
        &self,
        session: &mut Session,
        flow: &FlowDefinition,
        next: NodeId,
        activities: &mut Vec<ActivityEvent>,
    ) -> Advance {
        match flow.node(&next) {
            Some(node) => {
                session.advance_to(next);
                if self.registry.awaits_input(&node.kind) {
                    Advance::Stop
                } else {
                    Advance::Continue
                }
            }
            None => {
                session.record_error(format!("transition to unknown node: {}", next));
                activities.push(ActivityEvent::error(
                    kind::SESSION_ERRORED,
                    ActivityTarget::session(&session.session_key),
                    format!("Transition to unknown node: {}", next),
                ));
                Advance::Errored
            }
        }
    }

    async fn build_context(
        &self,
        session: &Session,
        owner_id: &OwnerId,
        node: &FlowNode,
    ) -> Result<NodeContext, EngineError> {
        let mut ctx = NodeContext::new(
            owner_id.clone(),
            node.id.clone(),
            SessionView::from(session),
            self.stores.records.clone(),
        );
        if let Some(group_id) = &session.group_id {
            if let Some(group) = self.stores.groups.find(group_id).await? {
                ctx = ctx.with_group(GroupView::from(&group));
            }
        }
        let user_vars = self
            .stores
            .shared
            .list(&user_scope(owner_id, &session.user_id))
            .await?;
        let global_vars = self.stores.shared.list(&global_scope(owner_id)).await?;
        Ok(ctx
            .with_user_vars(VariableMap::from(user_vars))
            .with_global_vars(VariableMap::from(global_vars)))
    }

    async fn apply_outcome(
        &self,
        session: &mut Session,
        owner_id: &OwnerId,
        outcome: crate::NodeOutcome,
        effects: &mut Vec<OutboundMessage>,
        minted: &mut Vec<DeferredWorkItem>,
        activities: &mut Vec<ActivityEvent>,
    ) -> Result<Transition, EngineError> {
        let crate::NodeOutcome {
            patch,
            effects: new_effects,
            transition,
            deferred,
            group,
        } = outcome;

        self.apply_patch(session, owner_id, patch).await?;
        if let Some(command) = group {
            self.apply_group_command(session, command, activities).await?;
        }
        effects.extend(new_effects);

        if let Some(spec) = deferred {
            let work_target = match spec.target_group {
                Some(group_id) => WorkTarget::Group { group_id },
                None => WorkTarget::Session {
                    session_key: session.session_key.clone(),
                },
            };
            let item = DeferredWorkItem::new(work_target, spec.due_at, spec.payload);
            activities.push(ActivityEvent::debug(
                kind::DEFERRED_SCHEDULED,
                ActivityTarget::session(&session.session_key),
                format!("Deferred work {} due at {}", item.id, item.due_at),
            ));
            minted.push(item);
        }

        Ok(transition)
    }

    async fn apply_patch(
        &self,
        session: &mut Session,
        owner_id: &OwnerId,
        patch: VariablesPatch,
    ) -> Result<(), EngineError> {
        if patch.is_empty() {
            return Ok(());
        }
        // Group writes are batched and applied under the group lock
        let mut shared_ops: Vec<(String, Option<serde_json::Value>)> = Vec::new();

        for op in patch.0 {
            match op {
                VarOp::Set {
                    scope: VarScope::Session,
                    key,
                    value,
                } => {
                    session.variables.set(key, value);
                    session.touch();
                }
                VarOp::Remove {
                    scope: VarScope::Session,
                    key,
                } => {
                    session.variables.remove(&key);
                    session.touch();
                }
                VarOp::Set {
                    scope: VarScope::User,
                    key,
                    value,
                } => {
                    self.stores
                        .shared
                        .set(&user_scope(owner_id, &session.user_id), &key, value)
                        .await?;
                }
                VarOp::Remove {
                    scope: VarScope::User,
                    key,
                } => {
                    self.stores
                        .shared
                        .delete(&user_scope(owner_id, &session.user_id), &key)
                        .await?;
                }
                VarOp::Set {
                    scope: VarScope::Global,
                    key,
                    value,
                } => {
                    self.stores
                        .shared
                        .set(&global_scope(owner_id), &key, value)
                        .await?;
                }
                VarOp::Remove {
                    scope: VarScope::Global,
                    key,
                } => {
                    self.stores
                        .shared
                        .delete(&global_scope(owner_id), &key)
                        .await?;
                }
                VarOp::Set {
                    scope: VarScope::Shared,
                    key,
                    value,
                } => shared_ops.push((key, Some(value))),
                VarOp::Remove {
                    scope: VarScope::Shared,
                    key,
                } => shared_ops.push((key, None)),
            }
        }

        if !shared_ops.is_empty() {
            let group_id = session.group_id.clone().ok_or_else(|| {
                EngineError::HandlerError(
                    "shared variable write outside a group session".to_string(),
                )
            })?;
            let _guard = self.locks.acquire(&group_lock_key(&group_id)).await;
            let mut group = self
                .stores
                .groups
                .find(&group_id)
                .await?
                .ok_or_else(|| EngineError::GroupSessionNotFound(group_id.0.clone()))?;
            for (key, value) in shared_ops {
                match value {
                    Some(value) => group.shared_variables.set(key, value),
                    None => {
                        group.shared_variables.remove(&key);
                    }
                }
            }
            self.stores.groups.update(&group).await?;
        }
        Ok(())
    }

    async fn apply_group_command(
        &self,
        session: &mut Session,
        command: GroupCommand,
        activities: &mut Vec<ActivityEvent>,
    ) -> Result<(), EngineError> {
        match command {
            GroupCommand::Create {
                anchor_node,
                result_variable,
            } => {
                let mut group = GroupSession::new(session.flow_id.clone(), anchor_node);
                group.add_participant(&session.user_id);
                let group = self.stores.groups.insert_new(group).await?;
                session.group_id = Some(group.id.clone());
                session.variables.set(result_variable, json!(group.id.0));
                session.touch();
                activities.push(ActivityEvent::info(
                    kind::GROUP_CREATED,
                    ActivityTarget::group(&group.id),
                    format!("Group session created by {}", session.user_id),
                ));
            }
            GroupCommand::Join { group_id } => {
                let _guard = self.locks.acquire(&group_lock_key(&group_id)).await;
                let group = self
                    .stores
                    .groups
                    .find(&group_id)
                    .await?
                    .ok_or_else(|| EngineError::GroupSessionNotFound(group_id.0.clone()))?;
                if !group.is_active() {
                    return Err(EngineError::HandlerError(format!(
                        "Group session {} is not active",
                        group_id
                    )));
                }
                let (group, added) = self
                    .stores
                    .groups
                    .add_participant(&group_id, &session.user_id)
                    .await?;
                session.group_id = Some(group.id.clone());
                session.touch();
                if added {
                    activities.push(ActivityEvent::info(
                        kind::GROUP_JOINED,
                        ActivityTarget::group(&group.id),
                        format!(
                            "{} joined ({} participants)",
                            session.user_id,
                            group.participant_ids.len()
                        ),
                    ));
                } else {
                    activities.push(ActivityEvent::debug(
                        kind::GROUP_JOINED,
                        ActivityTarget::group(&group.id),
                        format!("{} is already a participant", session.user_id),
                    ));
                }
            }
            GroupCommand::Leave => {
                let group_id = session.group_id.clone().ok_or_else(|| {
                    EngineError::HandlerError("Session is not in a group".to_string())
                })?;
                let _guard = self.locks.acquire(&group_lock_key(&group_id)).await;
                let (group, removed_last) = self
                    .stores
                    .groups
                    .remove_participant(&group_id, &session.user_id)
                    .await?;
                session.group_id = None;
                session.touch();
                activities.push(ActivityEvent::info(
                    kind::GROUP_LEFT,
                    ActivityTarget::group(&group.id),
                    format!(
                        "{} left ({} participants remain)",
                        session.user_id,
                        group.participant_ids.len()
                    ),
                ));
                if removed_last {
                    activities.push(ActivityEvent::info(
                        kind::GROUP_COMPLETED,
                        ActivityTarget::group(&group.id),
                        "Last participant left, group session completed",
                    ));
                }
            }
        }
        Ok(())
    }

    // Group-targeted deferred work executes directly against the group,
    // without stepping any individual session
    async fn resume_group(
        &self,
        group_id: &GroupSessionId,
        item: &DeferredWorkItem,
    ) -> Result<EngineReport, EngineError> {
        let _guard = self.locks.acquire(&group_lock_key(group_id)).await;
        let group = match self.stores.groups.find(group_id).await? {
            Some(group) if group.is_active() => group,
            _ => {
                debug!(group_id = %group_id, "Deferred work for inactive group");
                return Ok(EngineReport::ignored());
            }
        };

        match &item.payload {
            WorkPayload::Broadcast { text } => {
                let rendered = group.shared_variables.render(text);
                let messages: Vec<OutboundMessage> = group
                    .participant_ids
                    .iter()
                    .map(|participant| {
                        OutboundMessage::text(ChatId(participant.clone()), rendered.clone())
                    })
                    .collect();
                let recipients = messages.len();
                let effects_sent = self
                    .dispatcher
                    .broadcast(messages, &item.idempotency_key)
                    .await;
                self.activity
                    .record(ActivityEvent::info(
                        kind::GROUP_BROADCAST,
                        ActivityTarget::group(group_id),
                        format!("Broadcast to {} participants", recipients),
                    ))
                    .await;
                Ok(EngineReport {
                    session_key: None,
                    group_id: Some(group_id.clone()),
                    status: None,
                    steps: 0,
                    effects_sent,
                    ignored: false,
                })
            }
            WorkPayload::Continue => {
                warn!(group_id = %group_id, "Continue payload for a group target has no effect");
                Ok(EngineReport::ignored())
            }
        }
    }

    fn publish_session(&self, session: &Session) {
        self.notifier.publish(SessionNotification {
            target: ActivityTarget::session(&session.session_key),
            status: session.status.to_string(),
            current_node_id: session.current_node_id.clone(),
        });
    }
}
