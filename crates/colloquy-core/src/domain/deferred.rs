//! Deferred work items
//!
//! Delay, timer and group-action handlers schedule work that re-enters the
//! engine outside the triggering request. Delivery is at-least-once, so
//! every item carries an idempotency key its side effects are deduplicated
//! with.

use crate::domain::group::GroupSessionId;
use crate::domain::session::SessionKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a deferred item re-enters the engine for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkTarget {
    /// Resume an individual session at its stored cursor
    Session {
        /// Key of the session to resume
        session_key: SessionKey,
    },
    /// Execute a coordinated action for a group session
    Group {
        /// Group to act on
        group_id: GroupSessionId,
    },
}

/// Payload carried by a deferred item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkPayload {
    /// Plain continuation of a paused session
    Continue,
    /// Send a message to every participant of a group
    Broadcast {
        /// Message text, rendered against the group's shared variables
        text: String,
    },
}

/// A scheduled unit of execution consumed by the engine's resume path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredWorkItem {
    /// Item identifier
    pub id: String,
    /// Session or group the item targets
    pub target: WorkTarget,
    /// When the item becomes due
    pub due_at: DateTime<Utc>,
    /// Key deduplicating side effects across redeliveries
    pub idempotency_key: String,
    /// Delivery attempts so far
    pub attempts: u32,
    /// What to do on resume
    pub payload: WorkPayload,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl DeferredWorkItem {
    /// Create a fresh item with a generated id and idempotency key
    pub fn new(target: WorkTarget, due_at: DateTime<Utc>, payload: WorkPayload) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        Self {
            idempotency_key: format!("work:{}", id),
            id,
            target,
            due_at,
            attempts: 0,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Whether the item is due at `now`
    #[inline]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at <= now
    }
}

/// Exponential backoff delay for the given retry attempt, capped at
/// `max_ms`. Attempt numbers start at 1.
pub fn retry_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let delay = base_ms.saturating_mul(1u64 << exp).min(max_ms);
    Duration::from_millis(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn item(due_at: DateTime<Utc>) -> DeferredWorkItem {
        DeferredWorkItem::new(
            WorkTarget::Session {
                session_key: SessionKey("f1:c1".to_string()),
            },
            due_at,
            WorkPayload::Continue,
        )
    }

    #[test]
    fn test_new_item_has_key_and_zero_attempts() {
        let it = item(Utc::now());
        assert_eq!(it.attempts, 0);
        assert_eq!(it.idempotency_key, format!("work:{}", it.id));
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        assert!(item(now - ChronoDuration::seconds(1)).is_due(now));
        assert!(!item(now + ChronoDuration::seconds(60)).is_due(now));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(retry_backoff(1, 1000, 60_000), Duration::from_millis(1000));
        assert_eq!(retry_backoff(2, 1000, 60_000), Duration::from_millis(2000));
        assert_eq!(retry_backoff(3, 1000, 60_000), Duration::from_millis(4000));
        assert_eq!(retry_backoff(10, 1000, 60_000), Duration::from_millis(60_000));
        // large attempt numbers must not overflow
        assert_eq!(retry_backoff(64, 1000, 60_000), Duration::from_millis(60_000));
    }

    #[test]
    fn test_work_payload_serde_tagging() {
        let json = serde_json::to_value(&WorkPayload::Broadcast {
            text: "hi".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "broadcast");
        let back: WorkPayload = serde_json::from_value(json).unwrap();
        assert_eq!(
            back,
            WorkPayload::Broadcast {
                text: "hi".to_string()
            }
        );
    }
}
