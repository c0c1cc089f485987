//! Group session nodes
//!
//! These kinds never touch membership themselves; they emit a
//! [`GroupCommand`] or a group-targeted deferred broadcast and let the
//! engine apply it under the group lock.

use async_trait::async_trait;
use chrono::Utc;
use colloquy_core::domain::flow::NodeId;
use colloquy_core::{
    DeferredSpec, EngineError, GroupCommand, GroupSessionId, NodeContext, NodeHandler, NodeOutcome,
    Trigger, WorkPayload,
};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupCreateConfig {
    #[serde(default = "default_group_id_variable")]
    result_variable: String,
    #[serde(default)]
    anchor_node_id: Option<String>,
    next_node_id: String,
}

fn default_group_id_variable() -> String {
    "groupId".to_string()
}

/// Creates a group session with the current user as its first member.
#[derive(Debug, Default)]
pub struct GroupCreateHandler;

#[async_trait]
impl NodeHandler for GroupCreateHandler {
    fn kind(&self) -> &str {
        "group_create"
    }

    async fn execute(
        &self,
        _ctx: &NodeContext,
        config: &Value,
        _trigger: &Trigger,
    ) -> Result<NodeOutcome, EngineError> {
        let config: GroupCreateConfig = serde_json::from_value(config.clone())
            .map_err(|e| EngineError::InvalidConfiguration(format!("group_create node: {}", e)))?;

        Ok(
            NodeOutcome::goto(NodeId(config.next_node_id)).with_group_command(
                GroupCommand::Create {
                    anchor_node: config.anchor_node_id.map(NodeId),
                    result_variable: config.result_variable,
                },
            ),
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupJoinConfig {
    #[serde(default = "default_group_id_variable")]
    group_id_variable: String,
    next_node_id: String,
}

/// Joins the group named by a variable. Re-joining is a no-op.
#[derive(Debug, Default)]
pub struct GroupJoinHandler;

#[async_trait]
impl NodeHandler for GroupJoinHandler {
    fn kind(&self) -> &str {
        "group_join"
    }

    async fn execute(
        &self,
        ctx: &NodeContext,
        config: &Value,
        _trigger: &Trigger,
    ) -> Result<NodeOutcome, EngineError> {
        let config: GroupJoinConfig = serde_json::from_value(config.clone())
            .map_err(|e| EngineError::InvalidConfiguration(format!("group_join node: {}", e)))?;

        let group_id = match ctx.lookup(&config.group_id_variable) {
            Some(Value::String(id)) if !id.is_empty() => GroupSessionId(id),
            _ => {
                return Err(EngineError::HandlerError(format!(
                    "No group id under variable '{}'",
                    config.group_id_variable
                )))
            }
        };

        Ok(NodeOutcome::goto(NodeId(config.next_node_id))
            .with_group_command(GroupCommand::Join { group_id }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupActionConfig {
    text: String,
    #[serde(default)]
    delay_seconds: f64,
    next_node_id: String,
}

/// Schedules a broadcast to every participant of the current group.
///
/// The broadcast runs as deferred work outside the triggering request; its
/// text is rendered against the group's shared variables at delivery time.
#[derive(Debug, Default)]
pub struct GroupActionHandler;

#[async_trait]
impl NodeHandler for GroupActionHandler {
    fn kind(&self) -> &str {
        "group_action"
    }

    async fn execute(
        &self,
        ctx: &NodeContext,
        config: &Value,
        _trigger: &Trigger,
    ) -> Result<NodeOutcome, EngineError> {
        let config: GroupActionConfig = serde_json::from_value(config.clone())
            .map_err(|e| EngineError::InvalidConfiguration(format!("group_action node: {}", e)))?;

        let group = ctx.group.as_ref().ok_or_else(|| {
            EngineError::HandlerError(
                "group_action node executed outside a group session".to_string(),
            )
        })?;

        let due_at = Utc::now()
            + chrono::Duration::milliseconds((config.delay_seconds.max(0.0) * 1000.0) as i64);

        Ok(
            NodeOutcome::goto(NodeId(config.next_node_id)).with_deferred(DeferredSpec {
                due_at,
                payload: WorkPayload::Broadcast { text: config.text },
                target_group: Some(group.id.clone()),
            }),
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupLeaveConfig {
    next_node_id: String,
}

/// Leaves the current group session.
///
/// When the last participant leaves, the engine completes the group.
#[derive(Debug, Default)]
pub struct GroupLeaveHandler;

#[async_trait]
impl NodeHandler for GroupLeaveHandler {
    fn kind(&self) -> &str {
        "group_leave"
    }

    async fn execute(
        &self,
        _ctx: &NodeContext,
        config: &Value,
        _trigger: &Trigger,
    ) -> Result<NodeOutcome, EngineError> {
        let config: GroupLeaveConfig = serde_json::from_value(config.clone())
            .map_err(|e| EngineError::InvalidConfiguration(format!("group_leave node: {}", e)))?;

        Ok(NodeOutcome::goto(NodeId(config.next_node_id)).with_group_command(GroupCommand::Leave))
    }
}
