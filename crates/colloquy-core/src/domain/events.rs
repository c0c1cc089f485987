//! Activity events and notifications
//!
//! Activity events are the owner-facing audit trail: errors and notable
//! transitions are recorded through an [`ActivitySink`] and never leaked as
//! raw text to the chat user. Notifications are a best-effort broadcast for
//! live authoring UIs.

use crate::domain::flow::{FlowId, NodeId};
use crate::domain::group::GroupSessionId;
use crate::domain::session::SessionKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Well-known activity event kinds
pub mod kind {
    /// A new session was created
    pub const SESSION_STARTED: &str = "session.started";
    /// A session reached a terminal node
    pub const SESSION_COMPLETED: &str = "session.completed";
    /// A session idled beyond the TTL
    pub const SESSION_EXPIRED: &str = "session.expired";
    /// A session recorded a step failure and stayed active
    pub const SESSION_ERRORED: &str = "session.errored";
    /// The per-event step budget was exhausted
    pub const STEP_BUDGET_EXCEEDED: &str = "session.step_budget_exceeded";
    /// A node handler failed
    pub const NODE_FAILED: &str = "node.failed";
    /// A session stepped on a deactivated or missing flow
    pub const FLOW_INACTIVE: &str = "flow.inactive";
    /// A flow definition was deployed
    pub const FLOW_DEPLOYED: &str = "flow.deployed";
    /// A flow was activated or deactivated
    pub const FLOW_ACTIVATION_CHANGED: &str = "flow.activation_changed";
    /// A deferred work item was scheduled
    pub const DEFERRED_SCHEDULED: &str = "deferred.scheduled";
    /// A deferred work item exhausted its retry budget
    pub const DEFERRED_FAILED: &str = "deferred.failed";
    /// A group session was created
    pub const GROUP_CREATED: &str = "group.created";
    /// A participant joined a group session
    pub const GROUP_JOINED: &str = "group.joined";
    /// A participant left a group session
    pub const GROUP_LEFT: &str = "group.left";
    /// A group session completed
    pub const GROUP_COMPLETED: &str = "group.completed";
    /// A group broadcast was dispatched
    pub const GROUP_BROADCAST: &str = "group.broadcast";
}

/// Severity of an activity event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    /// Diagnostic detail
    Debug,
    /// Notable transition
    Info,
    /// Recoverable problem
    Warn,
    /// Failure needing owner attention
    Error,
}

/// What an activity event is about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityTarget {
    /// An individual session
    Session {
        /// Session key
        session_key: SessionKey,
    },
    /// A group session
    Group {
        /// Group identifier
        group_id: GroupSessionId,
    },
    /// A flow definition
    Flow {
        /// Flow identifier
        flow_id: FlowId,
    },
}

impl ActivityTarget {
    /// Target for a session key
    pub fn session(key: &SessionKey) -> Self {
        ActivityTarget::Session {
            session_key: key.clone(),
        }
    }

    /// Target for a group id
    pub fn group(id: &GroupSessionId) -> Self {
        ActivityTarget::Group {
            group_id: id.clone(),
        }
    }

    /// Target for a flow id
    pub fn flow(id: &FlowId) -> Self {
        ActivityTarget::Flow {
            flow_id: id.clone(),
        }
    }
}

/// One entry of the owner-facing activity log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// Dotted event kind, see [`kind`]
    pub kind: String,
    /// Severity
    pub level: ActivityLevel,
    /// Session, group or flow the event is about
    pub target: ActivityTarget,
    /// Human-readable description
    pub message: String,
    /// Structured details
    #[serde(default)]
    pub metadata: Value,
    /// When the event happened
    pub at: DateTime<Utc>,
}

impl ActivityEvent {
    fn new(kind: &str, level: ActivityLevel, target: ActivityTarget, message: String) -> Self {
        Self {
            kind: kind.to_string(),
            level,
            target,
            message,
            metadata: Value::Null,
            at: Utc::now(),
        }
    }

    /// Build a debug-level event
    pub fn debug(kind: &str, target: ActivityTarget, message: impl Into<String>) -> Self {
        Self::new(kind, ActivityLevel::Debug, target, message.into())
    }

    /// Build an info-level event
    pub fn info(kind: &str, target: ActivityTarget, message: impl Into<String>) -> Self {
        Self::new(kind, ActivityLevel::Info, target, message.into())
    }

    /// Build a warn-level event
    pub fn warn(kind: &str, target: ActivityTarget, message: impl Into<String>) -> Self {
        Self::new(kind, ActivityLevel::Warn, target, message.into())
    }

    /// Build an error-level event
    pub fn error(kind: &str, target: ActivityTarget, message: impl Into<String>) -> Self {
        Self::new(kind, ActivityLevel::Error, target, message.into())
    }

    /// Attach structured metadata
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Sink the engine records activity events through
#[async_trait]
pub trait ActivitySink: Send + Sync {
    /// Record one event. Implementations must not fail the engine; problems
    /// are logged and swallowed.
    async fn record(&self, event: ActivityEvent);
}

/// Activity sink that forwards events to the tracing subscriber
#[derive(Debug, Default)]
pub struct TracingActivitySink;

#[async_trait]
impl ActivitySink for TracingActivitySink {
    async fn record(&self, event: ActivityEvent) {
        match event.level {
            ActivityLevel::Debug => tracing::debug!(
                kind = %event.kind,
                target = ?event.target,
                metadata = %event.metadata,
                "{}",
                event.message
            ),
            ActivityLevel::Info => tracing::info!(
                kind = %event.kind,
                target = ?event.target,
                metadata = %event.metadata,
                "{}",
                event.message
            ),
            ActivityLevel::Warn => tracing::warn!(
                kind = %event.kind,
                target = ?event.target,
                metadata = %event.metadata,
                "{}",
                event.message
            ),
            ActivityLevel::Error => tracing::error!(
                kind = %event.kind,
                target = ?event.target,
                metadata = %event.metadata,
                "{}",
                event.message
            ),
        }
    }
}

/// Activity sink collecting events in memory, for tests
#[cfg(feature = "testing")]
#[derive(Debug, Default)]
pub struct RecordingActivitySink {
    events: std::sync::Mutex<Vec<ActivityEvent>>,
}

#[cfg(feature = "testing")]
impl RecordingActivitySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events
    pub fn events(&self) -> Vec<ActivityEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Events of one kind
    pub fn of_kind(&self, kind: &str) -> Vec<ActivityEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }
}

#[cfg(feature = "testing")]
#[async_trait]
impl ActivitySink for RecordingActivitySink {
    async fn record(&self, event: ActivityEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Live state change published for authoring UIs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionNotification {
    /// Session or group the change is about
    pub target: ActivityTarget,
    /// Status after the change, as its lowercase name
    pub status: String,
    /// Cursor after the change, if any
    pub current_node_id: Option<NodeId>,
}

/// Best-effort pub/sub fan-out of session state changes. Slow or absent
/// subscribers never block or fail the engine.
#[derive(Debug)]
pub struct SessionNotifier {
    tx: broadcast::Sender<SessionNotification>,
}

impl SessionNotifier {
    /// Create a notifier with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotification> {
        self.tx.subscribe()
    }

    /// Publish a state change
    pub fn publish(&self, notification: SessionNotification) {
        let _ = self.tx.send(notification);
    }
}

impl Default for SessionNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn target() -> ActivityTarget {
        ActivityTarget::Session {
            session_key: SessionKey("f1:c1".to_string()),
        }
    }

    #[test]
    fn test_event_builders_set_level() {
        assert_eq!(
            ActivityEvent::info(kind::SESSION_STARTED, target(), "started").level,
            ActivityLevel::Info
        );
        assert_eq!(
            ActivityEvent::error(kind::NODE_FAILED, target(), "boom").level,
            ActivityLevel::Error
        );
    }

    #[test]
    fn test_with_metadata() {
        let event = ActivityEvent::warn(kind::NODE_FAILED, target(), "hm")
            .with_metadata(json!({"node": "n3"}));
        assert_eq!(event.metadata["node"], "n3");
    }

    #[tokio::test]
    async fn test_recording_sink_collects() {
        let sink = RecordingActivitySink::new();
        sink.record(ActivityEvent::info(kind::SESSION_STARTED, target(), "a"))
            .await;
        sink.record(ActivityEvent::error(kind::NODE_FAILED, target(), "b"))
            .await;
        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.of_kind(kind::NODE_FAILED).len(), 1);
    }

    #[tokio::test]
    async fn test_notifier_delivers_to_subscriber() {
        let notifier = SessionNotifier::default();
        let mut rx = notifier.subscribe();
        notifier.publish(SessionNotification {
            target: target(),
            status: "active".to_string(),
            current_node_id: Some(NodeId("n2".to_string())),
        });
        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.status, "active");
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let notifier = SessionNotifier::default();
        notifier.publish(SessionNotification {
            target: target(),
            status: "completed".to_string(),
            current_node_id: None,
        });
    }
}
