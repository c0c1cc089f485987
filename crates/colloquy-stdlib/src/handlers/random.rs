//! `random` weighted selection
//!
//! Picks one of the configured options with probability proportional to its
//! weight, optionally records the chosen value, and follows the option's
//! edge.

use async_trait::async_trait;
use colloquy_core::domain::flow::NodeId;
use colloquy_core::{
    EngineError, NodeContext, NodeHandler, NodeOutcome, Trigger, VarScope, VariablesPatch,
};
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RandomOption {
    value: Value,
    #[serde(default = "default_weight")]
    weight: u32,
    next_node_id: String,
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RandomConfig {
    options: Vec<RandomOption>,
    #[serde(default)]
    result_variable: Option<String>,
}

fn pick_weighted<'a, R: Rng>(options: &'a [RandomOption], rng: &mut R) -> Option<&'a RandomOption> {
    let total: u64 = options.iter().map(|o| u64::from(o.weight)).sum();
    if total == 0 {
        return None;
    }
    let mut roll = rng.gen_range(0..total);
    for option in options {
        let weight = u64::from(option.weight);
        if roll < weight {
            return Some(option);
        }
        roll -= weight;
    }
    None
}

/// Weighted random routing.
#[derive(Debug, Default)]
pub struct RandomHandler;

#[async_trait]
impl NodeHandler for RandomHandler {
    fn kind(&self) -> &str {
        "random"
    }

    async fn execute(
        &self,
        _ctx: &NodeContext,
        config: &Value,
        _trigger: &Trigger,
    ) -> Result<NodeOutcome, EngineError> {
        let config: RandomConfig = serde_json::from_value(config.clone())
            .map_err(|e| EngineError::InvalidConfiguration(format!("random node: {}", e)))?;

        if config.options.is_empty() {
            return Err(EngineError::InvalidConfiguration(
                "random node needs at least one option".to_string(),
            ));
        }

        let chosen = pick_weighted(&config.options, &mut rand::thread_rng()).ok_or_else(|| {
            EngineError::InvalidConfiguration("random node weights sum to zero".to_string())
        })?;

        let mut outcome = NodeOutcome::goto(NodeId(chosen.next_node_id.clone()));
        if let Some(variable) = config.result_variable {
            outcome = outcome.with_patch(
                VariablesPatch::new().set(VarScope::Session, variable, chosen.value.clone()),
            );
        }
        Ok(outcome)
    }
}
