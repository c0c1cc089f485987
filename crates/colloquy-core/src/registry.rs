//! Handler registry
//!
//! Maps node kind strings to handler implementations. Kinds are open:
//! anything can be registered, and lookup of an unregistered kind is an
//! error rather than a silent skip.

use crate::error::EngineError;
use crate::NodeHandler;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of node handlers keyed by kind
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own kind, replacing any previous
    /// handler for that kind
    pub fn register(&mut self, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(handler.kind().to_string(), handler);
    }

    /// Register a handler under an alias kind
    pub fn register_as(&mut self, kind: &str, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(kind.to_string(), handler);
    }

    /// Look up the handler for a kind. Unknown kinds fail closed.
    pub fn get(&self, kind: &str) -> Result<Arc<dyn NodeHandler>, EngineError> {
        self.handlers
            .get(kind)
            .cloned()
            .ok_or_else(|| EngineError::UnsupportedNodeKind(kind.to_string()))
    }

    /// Whether a kind is registered
    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Whether the handler for a kind waits for user input before running.
    /// Unknown kinds report false; they fail at lookup instead.
    pub fn awaits_input(&self, kind: &str) -> bool {
        self.handlers
            .get(kind)
            .map(|h| h.awaits_input())
            .unwrap_or(false)
    }

    /// Registered kinds, unordered
    pub fn kinds(&self) -> Vec<&str> {
        self.handlers.keys().map(|k| k.as_str()).collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds = self.kinds();
        kinds.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}
