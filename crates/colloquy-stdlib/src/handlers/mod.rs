//! Built-in node handlers
//!
//! One module per family of kinds. Handlers are pure with respect to engine
//! state: they read the [`NodeContext`](colloquy_core::NodeContext), return a
//! [`NodeOutcome`](colloquy_core::NodeOutcome), and leave every write to the
//! engine.

/// `condition` branching
pub mod condition;
/// `start` and `end`
pub mod control;
/// `database` record access
pub mod database;
/// `delay` and `timer` scheduling
pub mod delay;
/// `group_create`, `group_join`, `group_action`, `group_leave`
pub mod group;
/// `loop` iteration
pub mod loops;
/// `message`, `keyboard` and `input`
pub mod messaging;
/// `random` weighted selection
pub mod random;
/// `variable` mutation
pub mod variable;
/// `webhook`/`api`/`integration` HTTP calls
pub mod webhook;

/// Pull a required string field out of a node configuration object.
pub(crate) fn require_str<'a>(
    config: &'a serde_json::Value,
    field: &str,
) -> Result<&'a str, colloquy_core::EngineError> {
    config
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            colloquy_core::EngineError::InvalidConfiguration(format!(
                "Missing required field '{}'",
                field
            ))
        })
}

/// Render `{name}` placeholders in every string of a JSON value, recursing
/// through arrays and objects.
pub(crate) fn render_value(
    ctx: &colloquy_core::NodeContext,
    value: &serde_json::Value,
) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::String(s) => Value::String(ctx.render(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(ctx, v)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(ctx, v)))
                .collect(),
        ),
        other => other.clone(),
    }
}
