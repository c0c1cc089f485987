//! `loop` iteration
//!
//! Each visit to the node decides one iteration: either bind the loop
//! variables and enter `bodyNodeId`, or clean up and leave through
//! `doneNodeId`. Iteration state lives in a session variable keyed by the
//! node id, so nested loops over different nodes do not collide. Runaway
//! loops are cut off by the engine's per-event step guard.

use async_trait::async_trait;
use colloquy_core::domain::flow::NodeId;
use colloquy_core::{
    EngineError, NodeContext, NodeHandler, NodeOutcome, Trigger, VarScope, VariablesPatch,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::condition::{evaluate, ConditionOperator};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WhileCondition {
    variable: String,
    operator: ConditionOperator,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoopConfig {
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    items_variable: Option<String>,
    #[serde(default)]
    while_condition: Option<WhileCondition>,
    #[serde(default = "default_item_variable")]
    item_variable: String,
    #[serde(default)]
    index_variable: Option<String>,
    body_node_id: String,
    done_node_id: String,
}

fn default_item_variable() -> String {
    "item".to_string()
}

fn state_key(node_id: &NodeId) -> String {
    format!("_loop_{}", node_id.0)
}

/// Iterates over a count, an array variable, or a while-condition.
#[derive(Debug, Default)]
pub struct LoopHandler;

#[async_trait]
impl NodeHandler for LoopHandler {
    fn kind(&self) -> &str {
        "loop"
    }

    async fn execute(
        &self,
        ctx: &NodeContext,
        config: &Value,
        _trigger: &Trigger,
    ) -> Result<NodeOutcome, EngineError> {
        let config: LoopConfig = serde_json::from_value(config.clone())
            .map_err(|e| EngineError::InvalidConfiguration(format!("loop node: {}", e)))?;

        let state_key = state_key(&ctx.node_id);
        let index = ctx
            .session
            .variables
            .get(&state_key)
            .and_then(|state| state.get("index"))
            .and_then(|i| i.as_u64())
            .unwrap_or(0);

        let mut item = None;
        let proceed = if let Some(count) = config.count {
            index < count
        } else if let Some(items_variable) = &config.items_variable {
            match ctx.lookup(items_variable) {
                Some(Value::Array(items)) => {
                    item = items.get(index as usize).cloned();
                    item.is_some()
                }
                _ => false,
            }
        } else if let Some(condition) = &config.while_condition {
            let current = ctx.lookup(&condition.variable);
            evaluate(current.as_ref(), condition.operator, &condition.value)
        } else {
            return Err(EngineError::InvalidConfiguration(
                "loop node needs 'count', 'itemsVariable' or 'whileCondition'".to_string(),
            ));
        };

        if proceed {
            let mut patch = VariablesPatch::new().set(
                VarScope::Session,
                state_key,
                json!({ "index": index + 1 }),
            );
            if let Some(item) = item {
                patch = patch.set(VarScope::Session, config.item_variable, item);
            }
            if let Some(index_variable) = config.index_variable {
                patch = patch.set(VarScope::Session, index_variable, json!(index));
            }
            Ok(NodeOutcome::goto(NodeId(config.body_node_id)).with_patch(patch))
        } else {
            let mut patch = VariablesPatch::new().remove(VarScope::Session, state_key);
            if config.items_variable.is_some() {
                patch = patch.remove(VarScope::Session, config.item_variable);
            }
            if let Some(index_variable) = config.index_variable {
                patch = patch.remove(VarScope::Session, index_variable);
            }
            Ok(NodeOutcome::goto(NodeId(config.done_node_id)).with_patch(patch))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testkit;
    use colloquy_core::{Transition, VarOp};

    fn goto_of(outcome: &NodeOutcome) -> &str {
        match &outcome.transition {
            Transition::Goto(node) => &node.0,
            other => panic!("expected goto, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn count_loop_enters_body_then_leaves() {
        let config = json!({"count": 2, "bodyNodeId": "body", "doneNodeId": "done"});
        let mut ctx = testkit::context();

        let first = LoopHandler
            .execute(&ctx, &config, &testkit::message("hi"))
            .await
            .unwrap();
        assert_eq!(goto_of(&first), "body");
        assert!(first
            .patch
            .iter()
            .any(|op| matches!(op, VarOp::Set { key, value, .. }
                if key == "_loop_n1" && value == &json!({"index": 1}))));

        ctx.session.variables.set("_loop_n1", json!({"index": 2}));
        let last = LoopHandler
            .execute(&ctx, &config, &testkit::message("hi"))
            .await
            .unwrap();
        assert_eq!(goto_of(&last), "done");
        assert!(last
            .patch
            .iter()
            .any(|op| matches!(op, VarOp::Remove { key, .. } if key == "_loop_n1")));
    }

    #[tokio::test]
    async fn items_loop_binds_item_and_index() {
        let mut ctx = testkit::context();
        ctx.session.variables.set("guests", json!(["ada", "grace"]));
        ctx.session.variables.set("_loop_n1", json!({"index": 1}));

        let outcome = LoopHandler
            .execute(
                &ctx,
                &json!({
                    "itemsVariable": "guests",
                    "itemVariable": "guest",
                    "indexVariable": "i",
                    "bodyNodeId": "body",
                    "doneNodeId": "done"
                }),
                &testkit::message("hi"),
            )
            .await
            .unwrap();

        assert_eq!(goto_of(&outcome), "body");
        assert!(outcome.patch.iter().any(|op| matches!(op, VarOp::Set { key, value, .. }
            if key == "guest" && value == &json!("grace"))));
        assert!(outcome.patch.iter().any(|op| matches!(op, VarOp::Set { key, value, .. }
            if key == "i" && value == &json!(1))));
    }

    #[tokio::test]
    async fn items_loop_with_missing_array_finishes_immediately() {
        let ctx = testkit::context();
        let outcome = LoopHandler
            .execute(
                &ctx,
                &json!({"itemsVariable": "ghosts", "bodyNodeId": "body", "doneNodeId": "done"}),
                &testkit::message("hi"),
            )
            .await
            .unwrap();

        assert_eq!(goto_of(&outcome), "done");
    }

    #[tokio::test]
    async fn while_loop_re_evaluates_the_condition() {
        let mut ctx = testkit::context();
        ctx.session.variables.set("hungry", json!(true));
        let config = json!({
            "whileCondition": {"variable": "hungry", "operator": "equals", "value": true},
            "bodyNodeId": "eat",
            "doneNodeId": "nap"
        });

        let outcome = LoopHandler
            .execute(&ctx, &config, &testkit::message("hi"))
            .await
            .unwrap();
        assert_eq!(goto_of(&outcome), "eat");

        ctx.session.variables.set("hungry", json!(false));
        let outcome = LoopHandler
            .execute(&ctx, &config, &testkit::message("hi"))
            .await
            .unwrap();
        assert_eq!(goto_of(&outcome), "nap");
    }

    #[tokio::test]
    async fn loop_without_a_mode_is_invalid() {
        let ctx = testkit::context();
        let err = LoopHandler
            .execute(
                &ctx,
                &json!({"bodyNodeId": "body", "doneNodeId": "done"}),
                &testkit::message("hi"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::InvalidConfiguration(_)));
    }
}
