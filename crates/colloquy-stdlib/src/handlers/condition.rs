//! `condition` branching
//!
//! Evaluates one operator against a variable from the merged view and takes
//! the node's true or false edge. Comparison is deliberately forgiving about
//! numeric representation, so `"5"`, `5` and `5.0` compare equal.

use async_trait::async_trait;
use colloquy_core::{EngineError, NodeContext, NodeHandler, NodeOutcome, Trigger};
use serde::Deserialize;
use serde_json::Value;

/// The comparison a `condition` node performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    /// Variable equals the configured value
    Equals,
    /// Variable differs from the configured value
    NotEquals,
    /// Variable is present and non-null
    Exists,
    /// Variable is absent or null
    NotExists,
    /// String contains the value as a substring, or array contains it as
    /// an element
    Contains,
    /// Negation of `Contains`
    NotContains,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConditionConfig {
    variable: String,
    operator: ConditionOperator,
    #[serde(default)]
    value: Value,
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn loosely_equal(current: &Value, expected: &Value) -> bool {
    if current == expected {
        return true;
    }
    matches!((as_number(current), as_number(expected)), (Some(a), Some(b)) if a == b)
}

fn contains(current: &Value, expected: &Value) -> bool {
    match current {
        Value::String(s) => match expected {
            Value::String(needle) => s.contains(needle.as_str()),
            other => s.contains(&other.to_string()),
        },
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, expected)),
        _ => false,
    }
}

/// Evaluate `operator` for a variable's current value.
///
/// `current` is `None` when the variable is not set in any scope. Also used
/// by the `loop` handler for its while-condition.
pub fn evaluate(current: Option<&Value>, operator: ConditionOperator, expected: &Value) -> bool {
    let present = matches!(current, Some(v) if !v.is_null());
    match operator {
        ConditionOperator::Exists => present,
        ConditionOperator::NotExists => !present,
        ConditionOperator::Equals => {
            matches!(current, Some(v) if loosely_equal(v, expected))
        }
        ConditionOperator::NotEquals => {
            !matches!(current, Some(v) if loosely_equal(v, expected))
        }
        ConditionOperator::Contains => {
            matches!(current, Some(v) if contains(v, expected))
        }
        ConditionOperator::NotContains => {
            !matches!(current, Some(v) if contains(v, expected))
        }
    }
}

/// Routes to the true or false edge of the node.
#[derive(Debug, Default)]
pub struct ConditionHandler;

#[async_trait]
impl NodeHandler for ConditionHandler {
    fn kind(&self) -> &str {
        "condition"
    }

    async fn execute(
        &self,
        ctx: &NodeContext,
        config: &Value,
        _trigger: &Trigger,
    ) -> Result<NodeOutcome, EngineError> {
        let config: ConditionConfig = serde_json::from_value(config.clone())
            .map_err(|e| EngineError::InvalidConfiguration(format!("condition node: {}", e)))?;

        let current = ctx.lookup(&config.variable);
        let verdict = evaluate(current.as_ref(), config.operator, &config.value);
        Ok(NodeOutcome::branch(verdict))
    }
}
