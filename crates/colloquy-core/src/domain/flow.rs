//! Flow definition domain model
//!
//! A flow is an author-defined directed graph of nodes. Transitions are
//! encoded inside each node's configuration payload under conventional
//! keys rather than as first-class edges, so the graph can grow new node
//! kinds without schema changes.

use crate::error::EngineError;
use crate::types::InboundEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

/// Unique identifier for a flow definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId(pub String);

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a node within a flow
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the account owning a flow
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The node kind every flow enters through
pub const START_NODE_KIND: &str = "start";

/// Canvas position of a node, kept for authoring tools only
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UiPosition {
    /// Horizontal canvas coordinate
    pub x: f64,
    /// Vertical canvas coordinate
    pub y: f64,
}

/// What kind of inbound event starts a new session for a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryTrigger {
    /// A message beginning with a command, e.g. "/start"
    Command {
        /// The command including its leading slash
        command: String,
    },
    /// A message equal to a keyword, compared case-insensitively
    Keyword {
        /// The keyword to match
        keyword: String,
    },
    /// Any inbound message
    AnyMessage,
}

impl Default for EntryTrigger {
    fn default() -> Self {
        EntryTrigger::AnyMessage
    }
}

impl EntryTrigger {
    /// Whether an inbound event should start this flow
    pub fn matches(&self, event: &InboundEvent) -> bool {
        match self {
            EntryTrigger::Command { command } => event
                .text
                .as_deref()
                .map(|t| t.trim_start().starts_with(command.as_str()))
                .unwrap_or(false),
            EntryTrigger::Keyword { keyword } => event
                .payload_text()
                .map(|t| t.trim().eq_ignore_ascii_case(keyword))
                .unwrap_or(false),
            EntryTrigger::AnyMessage => true,
        }
    }
}

/// Configuration keys that may carry a transition target
const TRANSITION_KEYS: &[&str] = &[
    "nextNodeId",
    "trueNodeId",
    "falseNodeId",
    "errorNodeId",
    "bodyNodeId",
    "doneNodeId",
];

/// One node of a flow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    /// Node identifier, unique within the flow
    pub id: NodeId,
    /// Owning flow
    pub flow_id: FlowId,
    /// Open kind tag the handler registry dispatches on
    pub kind: String,
    /// Kind-specific configuration payload, transitions included
    #[serde(default)]
    pub configuration: Value,
    /// Authoring-tool canvas position, non-functional
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_position: Option<UiPosition>,
}

impl FlowNode {
    /// Create a node
    pub fn new(
        id: impl Into<String>,
        flow_id: FlowId,
        kind: impl Into<String>,
        configuration: Value,
    ) -> Self {
        Self {
            id: NodeId(id.into()),
            flow_id,
            kind: kind.into(),
            configuration,
            ui_position: None,
        }
    }

    /// A string field of the configuration payload
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.configuration.get(key).and_then(|v| v.as_str())
    }

    /// The plain continue edge, if configured
    pub fn next_node_id(&self) -> Option<NodeId> {
        self.config_str("nextNodeId").map(|s| NodeId(s.to_string()))
    }

    /// The error edge, if configured
    pub fn error_node_id(&self) -> Option<NodeId> {
        self.config_str("errorNodeId").map(|s| NodeId(s.to_string()))
    }

    /// The branch edge for a condition result
    pub fn branch_target(&self, which: bool) -> Option<NodeId> {
        let key = if which { "trueNodeId" } else { "falseNodeId" };
        self.config_str(key).map(|s| NodeId(s.to_string()))
    }

    /// Every transition target this node's configuration references
    pub fn transition_targets(&self) -> Vec<NodeId> {
        let mut targets = Vec::new();
        for key in TRANSITION_KEYS {
            if let Some(id) = self.config_str(key) {
                targets.push(NodeId(id.to_string()));
            }
        }
        if let Some(options) = self.configuration.get("options").and_then(|v| v.as_array()) {
            for option in options {
                if let Some(id) = option.get("nextNodeId").and_then(|v| v.as_str()) {
                    targets.push(NodeId(id.to_string()));
                }
            }
        }
        targets
    }
}

/// An author-defined conversational flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// Flow identifier
    pub id: FlowId,
    /// Owning account
    pub owner_id: OwnerId,
    /// Human-readable name
    pub name: String,
    /// What starts a new session for this flow
    #[serde(default)]
    pub entry: EntryTrigger,
    /// The node graph
    pub nodes: Vec<FlowNode>,
    /// Whether the flow accepts and continues sessions
    pub active: bool,
}

impl FlowDefinition {
    /// Create an active flow with the default entry trigger
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        name: impl Into<String>,
        nodes: Vec<FlowNode>,
    ) -> Self {
        Self {
            id: FlowId(id.into()),
            owner_id: OwnerId(owner_id.into()),
            name: name.into(),
            entry: EntryTrigger::default(),
            nodes,
            active: true,
        }
    }

    /// Look up a node by id
    pub fn node(&self, id: &NodeId) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// The unique entry node
    pub fn start_node(&self) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.kind == START_NODE_KIND)
    }

    /// Validate authoring-time invariants: exactly one start node, unique
    /// node ids, non-empty kinds, and every referenced transition target
    /// resolving to an existing node.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.nodes.is_empty() {
            return Err(EngineError::InvalidConfiguration(format!(
                "Flow {} has no nodes",
                self.id
            )));
        }

        let start_count = self
            .nodes
            .iter()
            .filter(|n| n.kind == START_NODE_KIND)
            .count();
        if start_count != 1 {
            return Err(EngineError::InvalidConfiguration(format!(
                "Flow {} must have exactly one start node, found {}",
                self.id, start_count
            )));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.kind.trim().is_empty() {
                return Err(EngineError::InvalidConfiguration(format!(
                    "Node {} in flow {} has an empty kind",
                    node.id, self.id
                )));
            }
            if !seen.insert(node.id.0.as_str()) {
                return Err(EngineError::InvalidConfiguration(format!(
                    "Duplicate node id {} in flow {}",
                    node.id, self.id
                )));
            }
        }

        for node in &self.nodes {
            for target in node.transition_targets() {
                if self.node(&target).is_none() {
                    return Err(EngineError::InvalidConfiguration(format!(
                        "Node {} in flow {} references missing node {}",
                        node.id, self.id, target
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flow_with(nodes: Vec<FlowNode>) -> FlowDefinition {
        FlowDefinition::new("f1", "owner-1", "Test flow", nodes)
    }

    fn node(id: &str, kind: &str, config: Value) -> FlowNode {
        FlowNode::new(id, FlowId("f1".to_string()), kind, config)
    }

    #[test]
    fn test_validate_accepts_well_formed_flow() {
        let flow = flow_with(vec![
            node("n1", "start", json!({"nextNodeId": "n2"})),
            node("n2", "message", json!({"text": "hi", "nextNodeId": "n3"})),
            node("n3", "end", json!({})),
        ]);
        assert!(flow.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_start() {
        let flow = flow_with(vec![node("n1", "message", json!({}))]);
        let err = flow.validate().unwrap_err();
        assert!(err.to_string().contains("exactly one start node"));
    }

    #[test]
    fn test_validate_rejects_duplicate_start() {
        let flow = flow_with(vec![
            node("n1", "start", json!({})),
            node("n2", "start", json!({})),
        ]);
        assert!(flow.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_node_ids() {
        let flow = flow_with(vec![
            node("n1", "start", json!({})),
            node("n1", "message", json!({})),
        ]);
        let err = flow.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate node id"));
    }

    #[test]
    fn test_validate_rejects_dangling_transition() {
        let flow = flow_with(vec![node("n1", "start", json!({"nextNodeId": "ghost"}))]);
        let err = flow.validate().unwrap_err();
        assert!(err.to_string().contains("missing node ghost"));
    }

    #[test]
    fn test_validate_checks_option_edges() {
        let flow = flow_with(vec![
            node("n1", "start", json!({"nextNodeId": "n2"})),
            node(
                "n2",
                "random",
                json!({"options": [{"value": "a", "nextNodeId": "nope"}]}),
            ),
        ]);
        assert!(flow.validate().is_err());
    }

    #[test]
    fn test_branch_and_error_edges() {
        let n = node(
            "n1",
            "condition",
            json!({"trueNodeId": "t", "falseNodeId": "f", "errorNodeId": "e"}),
        );
        assert_eq!(n.branch_target(true), Some(NodeId("t".to_string())));
        assert_eq!(n.branch_target(false), Some(NodeId("f".to_string())));
        assert_eq!(n.error_node_id(), Some(NodeId("e".to_string())));
    }

    #[test]
    fn test_entry_trigger_matching() {
        let hello = InboundEvent::message("c1", "u1", "  hello  ");
        let start = InboundEvent::message("c1", "u1", "/start now");
        let tap = InboundEvent::selection("c1", "u1", "HELLO");

        assert!(EntryTrigger::AnyMessage.matches(&hello));
        assert!(EntryTrigger::Command {
            command: "/start".to_string()
        }
        .matches(&start));
        assert!(!EntryTrigger::Command {
            command: "/start".to_string()
        }
        .matches(&hello));
        let keyword = EntryTrigger::Keyword {
            keyword: "hello".to_string(),
        };
        assert!(keyword.matches(&hello));
        assert!(keyword.matches(&tap));
        assert!(!keyword.matches(&start));
    }

    #[test]
    fn test_flow_definition_serde_round_trip() {
        let flow = flow_with(vec![node("n1", "start", json!({"nextNodeId": "n1"}))]);
        let value = serde_json::to_value(&flow).unwrap();
        let back: FlowDefinition = serde_json::from_value(value).unwrap();
        assert_eq!(back, flow);
        assert_eq!(back.entry, EntryTrigger::AnyMessage);
    }
}
