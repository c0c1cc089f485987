//! Entry and exit nodes
//!
//! `start` is a plain pass-through so the registry stays uniform: the first
//! step of every session dispatches like any other. `end` finishes the flow.

use async_trait::async_trait;
use colloquy_core::domain::flow::{NodeId, START_NODE_KIND};
use colloquy_core::{EngineError, NodeContext, NodeHandler, NodeOutcome, Trigger};
use serde_json::Value;

use super::require_str;

/// Entry node: hands execution straight to `nextNodeId`.
#[derive(Debug, Default)]
pub struct StartHandler;

#[async_trait]
impl NodeHandler for StartHandler {
    fn kind(&self) -> &str {
        START_NODE_KIND
    }

    async fn execute(
        &self,
        _ctx: &NodeContext,
        config: &Value,
        _trigger: &Trigger,
    ) -> Result<NodeOutcome, EngineError> {
        let next = require_str(config, "nextNodeId")?;
        Ok(NodeOutcome::goto(NodeId(next.to_string())))
    }
}

/// Exit node: marks the session completed.
#[derive(Debug, Default)]
pub struct EndHandler;

#[async_trait]
impl NodeHandler for EndHandler {
    fn kind(&self) -> &str {
        "end"
    }

    async fn execute(
        &self,
        _ctx: &NodeContext,
        _config: &Value,
        _trigger: &Trigger,
    ) -> Result<NodeOutcome, EngineError> {
        Ok(NodeOutcome::terminal())
    }
}
