//! Error types for the Colloquy engine

use thiserror::Error;

/// Errors produced by the engine, the stores, and node handlers
#[derive(Error, Debug)]
pub enum EngineError {
    /// Flow definition not found
    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    /// Flow exists but has been deactivated
    #[error("Flow inactive: {0}")]
    FlowInactive(String),

    /// Node not found within a flow definition
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// No handler registered for a node kind
    #[error("Unsupported node kind: {0}")]
    UnsupportedNodeKind(String),

    /// Node configuration failed validation or deserialization
    #[error("Invalid node configuration: {0}")]
    InvalidConfiguration(String),

    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Group session not found
    #[error("Group session not found: {0}")]
    GroupSessionNotFound(String),

    /// Optimistic concurrency check failed on a conditional update
    #[error("Version conflict: {0}")]
    VersionConflict(String),

    /// Session or group session transition not allowed in the current status
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// State store failure
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Deferred work queue failure
    #[error("Queue error: {0}")]
    QueueError(String),

    /// Outbound call to an external service failed
    #[error("External call error: {0}")]
    ExternalCallError(String),

    /// Node handler failure
    #[error("Handler error: {0}")]
    HandlerError(String),

    /// Engine configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization or deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Any other error
    #[error("Error: {0}")]
    Other(String),
}

impl EngineError {
    /// Whether the deferred worker should retry an operation that failed
    /// with this error. Authoring mistakes and terminal-state errors are
    /// never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::StateStoreError(_)
                | EngineError::QueueError(_)
                | EngineError::ExternalCallError(_)
                | EngineError::VersionConflict(_)
        )
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::SerializationError(err.to_string())
    }
}

impl From<String> for EngineError {
    fn from(err: String) -> Self {
        EngineError::Other(err)
    }
}

impl From<&str> for EngineError {
    fn from(err: &str) -> Self {
        EngineError::Other(err.to_string())
    }
}
