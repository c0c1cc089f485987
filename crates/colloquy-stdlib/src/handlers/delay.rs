//! `delay` and `timer` scheduling
//!
//! Both kinds run twice. The live pass computes the due time, pauses the
//! session on the node and schedules deferred work; the resume pass sees
//! `Trigger::Resume` and moves on to `nextNodeId` without any further
//! inbound chat input.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use colloquy_core::domain::flow::NodeId;
use colloquy_core::{
    DeferredSpec, EngineError, NodeContext, NodeHandler, NodeOutcome, ResumeCondition, Trigger,
    WorkPayload,
};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DelayConfig {
    #[serde(default)]
    seconds: Option<f64>,
    #[serde(default)]
    until: Option<DateTime<Utc>>,
    next_node_id: String,
}

fn schedule(due_at: DateTime<Utc>, next: &str, trigger: &Trigger) -> NodeOutcome {
    if trigger.is_resume() {
        return NodeOutcome::goto(NodeId(next.to_string()));
    }
    NodeOutcome::pause(ResumeCondition::Timer { due_at }).with_deferred(DeferredSpec {
        due_at,
        payload: WorkPayload::Continue,
        target_group: None,
    })
}

/// Pauses the session for a relative duration or until a point in time.
#[derive(Debug, Default)]
pub struct DelayHandler;

#[async_trait]
impl NodeHandler for DelayHandler {
    fn kind(&self) -> &str {
        "delay"
    }

    async fn execute(
        &self,
        _ctx: &NodeContext,
        config: &Value,
        trigger: &Trigger,
    ) -> Result<NodeOutcome, EngineError> {
        let config: DelayConfig = serde_json::from_value(config.clone())
            .map_err(|e| EngineError::InvalidConfiguration(format!("delay node: {}", e)))?;

        if trigger.is_resume() {
            return Ok(NodeOutcome::goto(NodeId(config.next_node_id)));
        }

        let due_at = match (config.until, config.seconds) {
            (Some(until), _) => until,
            (None, Some(seconds)) => {
                Utc::now() + chrono::Duration::milliseconds((seconds.max(0.0) * 1000.0) as i64)
            }
            (None, None) => {
                return Err(EngineError::InvalidConfiguration(
                    "delay node needs 'seconds' or 'until'".to_string(),
                ))
            }
        };

        Ok(schedule(due_at, &config.next_node_id, trigger))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimerConfig {
    at: DateTime<Utc>,
    next_node_id: String,
}

/// Pauses the session until an absolute point in time.
#[derive(Debug, Default)]
pub struct TimerHandler;

#[async_trait]
impl NodeHandler for TimerHandler {
    fn kind(&self) -> &str {
        "timer"
    }

    async fn execute(
        &self,
        _ctx: &NodeContext,
        config: &Value,
        trigger: &Trigger,
    ) -> Result<NodeOutcome, EngineError> {
        let config: TimerConfig = serde_json::from_value(config.clone())
            .map_err(|e| EngineError::InvalidConfiguration(format!("timer node: {}", e)))?;

        Ok(schedule(config.at, &config.next_node_id, trigger))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testkit;
    use colloquy_core::Transition;
    use serde_json::json;

    #[tokio::test]
    async fn delay_schedules_and_pauses_on_first_pass() {
        let ctx = testkit::context();
        let before = Utc::now();

        let outcome = DelayHandler
            .execute(
                &ctx,
                &json!({"seconds": 90, "nextNodeId": "after"}),
                &testkit::message("hi"),
            )
            .await
            .unwrap();

        let spec = outcome.deferred.as_ref().expect("deferred work scheduled");
        assert_eq!(spec.payload, WorkPayload::Continue);
        assert_eq!(spec.target_group, None);
        let offset = (spec.due_at - before).num_seconds();
        assert!((89..=91).contains(&offset), "due in {offset}s");
        assert!(matches!(
            outcome.transition,
            Transition::Pause(ResumeCondition::Timer { due_at }) if due_at == spec.due_at
        ));
    }

    #[tokio::test]
    async fn delay_resume_moves_on() {
        let ctx = testkit::context();
        let outcome = DelayHandler
            .execute(
                &ctx,
                &json!({"seconds": 90, "nextNodeId": "after"}),
                &testkit::resume(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.transition, Transition::Goto(NodeId("after".to_string())));
        assert!(outcome.deferred.is_none());
    }

    #[tokio::test]
    async fn delay_without_schedule_is_invalid() {
        let ctx = testkit::context();
        let err = DelayHandler
            .execute(&ctx, &json!({"nextNodeId": "after"}), &testkit::message("hi"))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn timer_uses_the_absolute_time() {
        let ctx = testkit::context();
        let at: DateTime<Utc> = "2030-01-01T09:00:00Z".parse().unwrap();

        let outcome = TimerHandler
            .execute(
                &ctx,
                &json!({"at": "2030-01-01T09:00:00Z", "nextNodeId": "after"}),
                &testkit::message("hi"),
            )
            .await
            .unwrap();

        assert_eq!(outcome.deferred.as_ref().map(|s| s.due_at), Some(at));

        let resumed = TimerHandler
            .execute(
                &ctx,
                &json!({"at": "2030-01-01T09:00:00Z", "nextNodeId": "after"}),
                &testkit::resume(),
            )
            .await
            .unwrap();
        assert_eq!(resumed.transition, Transition::Goto(NodeId("after".to_string())));
    }
}
