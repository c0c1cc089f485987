//! `variable` mutation
//!
//! Applies one operation to a named variable in a chosen scope. The current
//! value is read from that scope only, not from the merged view, so a user
//! counter is unaffected by a session variable of the same name.

use async_trait::async_trait;
use colloquy_core::domain::flow::NodeId;
use colloquy_core::types::value_to_text;
use colloquy_core::{
    EngineError, NodeContext, NodeHandler, NodeOutcome, Trigger, VarScope, VariablesPatch,
};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum VariableOperation {
    Set,
    Append,
    Prepend,
    Increment,
    Decrement,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariableConfig {
    name: String,
    #[serde(default = "default_scope")]
    scope: VarScope,
    operation: VariableOperation,
    #[serde(default)]
    value: Value,
    next_node_id: String,
}

fn default_scope() -> VarScope {
    VarScope::Session
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

fn apply(operation: VariableOperation, current: Option<&Value>, value: Value) -> Value {
    match operation {
        VariableOperation::Set => value,
        VariableOperation::Append => match current {
            None | Some(Value::Null) => value,
            Some(Value::Array(items)) => {
                let mut items = items.clone();
                items.push(value);
                Value::Array(items)
            }
            Some(other) => json!(format!("{}{}", value_to_text(other), value_to_text(&value))),
        },
        VariableOperation::Prepend => match current {
            None | Some(Value::Null) => value,
            Some(Value::Array(items)) => {
                let mut out = vec![value];
                out.extend(items.iter().cloned());
                Value::Array(out)
            }
            Some(other) => json!(format!("{}{}", value_to_text(&value), value_to_text(other))),
        },
        VariableOperation::Increment | VariableOperation::Decrement => {
            let delta = as_number(&value).unwrap_or(1.0);
            let base = current.and_then(as_number).unwrap_or(0.0);
            let next = if operation == VariableOperation::Increment {
                base + delta
            } else {
                base - delta
            };
            number_value(next)
        }
    }
}

/// Mutates one variable and continues.
#[derive(Debug, Default)]
pub struct VariableHandler;

#[async_trait]
impl NodeHandler for VariableHandler {
    fn kind(&self) -> &str {
        "variable"
    }

    async fn execute(
        &self,
        ctx: &NodeContext,
        config: &Value,
        _trigger: &Trigger,
    ) -> Result<NodeOutcome, EngineError> {
        let config: VariableConfig = serde_json::from_value(config.clone())
            .map_err(|e| EngineError::InvalidConfiguration(format!("variable node: {}", e)))?;

        let current = match config.scope {
            VarScope::Session => ctx.session.variables.get(&config.name),
            VarScope::Shared => match &ctx.group {
                Some(group) => group.shared_variables.get(&config.name),
                None => {
                    return Err(EngineError::HandlerError(
                        "variable node targets shared scope outside a group session".to_string(),
                    ))
                }
            },
            VarScope::User => ctx.user_vars.get(&config.name),
            VarScope::Global => ctx.global_vars.get(&config.name),
        };

        let value = match config.value {
            Value::String(s) => json!(ctx.render(&s)),
            other => other,
        };

        let next_value = apply(config.operation, current, value);
        let patch = VariablesPatch::new().set(config.scope, config.name, next_value);
        Ok(NodeOutcome::goto(NodeId(config.next_node_id)).with_patch(patch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testkit;
    use colloquy_core::types::VariableMap;
    use colloquy_core::VarOp;

    fn single_op(outcome: &NodeOutcome) -> &VarOp {
        let mut ops = outcome.patch.iter();
        let op = ops.next().expect("patch should hold one op");
        assert!(ops.next().is_none());
        op
    }

    #[tokio::test]
    async fn set_renders_templates() {
        let mut ctx = testkit::context();
        ctx.session.variables.set("name", json!("Ada"));

        let outcome = VariableHandler
            .execute(
                &ctx,
                &json!({
                    "name": "greeting",
                    "operation": "set",
                    "value": "Hi {name}",
                    "nextNodeId": "next"
                }),
                &testkit::message("hi"),
            )
            .await
            .unwrap();

        assert_eq!(
            single_op(&outcome),
            &VarOp::Set {
                scope: VarScope::Session,
                key: "greeting".to_string(),
                value: json!("Hi Ada"),
            }
        );
    }

    #[tokio::test]
    async fn append_pushes_to_arrays_and_concatenates_strings() {
        let mut ctx = testkit::context();
        ctx.session.variables.set("cart", json!(["apple"]));
        ctx.session.variables.set("log", json!("a"));

        let outcome = VariableHandler
            .execute(
                &ctx,
                &json!({"name": "cart", "operation": "append", "value": "pear", "nextNodeId": "n"}),
                &testkit::message("hi"),
            )
            .await
            .unwrap();
        assert!(matches!(
            single_op(&outcome),
            VarOp::Set { value, .. } if value == &json!(["apple", "pear"])
        ));

        let outcome = VariableHandler
            .execute(
                &ctx,
                &json!({"name": "log", "operation": "append", "value": "b", "nextNodeId": "n"}),
                &testkit::message("hi"),
            )
            .await
            .unwrap();
        assert!(matches!(
            single_op(&outcome),
            VarOp::Set { value, .. } if value == &json!("ab")
        ));
    }

    #[tokio::test]
    async fn prepend_mirrors_append() {
        let mut ctx = testkit::context();
        ctx.session.variables.set("queue", json!(["second"]));

        let outcome = VariableHandler
            .execute(
                &ctx,
                &json!({"name": "queue", "operation": "prepend", "value": "first", "nextNodeId": "n"}),
                &testkit::message("hi"),
            )
            .await
            .unwrap();

        assert!(matches!(
            single_op(&outcome),
            VarOp::Set { value, .. } if value == &json!(["first", "second"])
        ));
    }

    #[tokio::test]
    async fn increment_defaults_to_one_from_zero() {
        let ctx = testkit::context();
        let outcome = VariableHandler
            .execute(
                &ctx,
                &json!({"name": "count", "operation": "increment", "nextNodeId": "n"}),
                &testkit::message("hi"),
            )
            .await
            .unwrap();

        assert!(matches!(
            single_op(&outcome),
            VarOp::Set { value, .. } if value == &json!(1)
        ));
    }

    #[tokio::test]
    async fn decrement_uses_the_configured_delta() {
        let mut ctx = testkit::context();
        ctx.session.variables.set("stock", json!(10));

        let outcome = VariableHandler
            .execute(
                &ctx,
                &json!({"name": "stock", "operation": "decrement", "value": 2.5, "nextNodeId": "n"}),
                &testkit::message("hi"),
            )
            .await
            .unwrap();

        assert!(matches!(
            single_op(&outcome),
            VarOp::Set { value, .. } if value == &json!(7.5)
        ));
    }

    #[tokio::test]
    async fn scope_reads_do_not_leak_across_scopes() {
        let mut ctx = testkit::context();
        ctx.session.variables.set("count", json!(100));
        let mut user_vars = VariableMap::new();
        user_vars.set("count", json!(5));
        ctx = ctx.with_user_vars(user_vars);

        let outcome = VariableHandler
            .execute(
                &ctx,
                &json!({"name": "count", "scope": "user", "operation": "increment", "nextNodeId": "n"}),
                &testkit::message("hi"),
            )
            .await
            .unwrap();

        assert_eq!(
            single_op(&outcome),
            &VarOp::Set {
                scope: VarScope::User,
                key: "count".to_string(),
                value: json!(6),
            }
        );
    }

    #[tokio::test]
    async fn shared_scope_without_a_group_fails() {
        let ctx = testkit::context();
        let err = VariableHandler
            .execute(
                &ctx,
                &json!({"name": "pot", "scope": "shared", "operation": "set", "value": 1, "nextNodeId": "n"}),
                &testkit::message("hi"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::HandlerError(_)));
    }
}
