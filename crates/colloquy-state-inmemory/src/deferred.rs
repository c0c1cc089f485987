//! In-memory deferred work queue with a polling ticker
//!
//! `InMemoryDeferredWorkQueue` keeps scheduled items in a map and hands due
//! ones to a channel from a background scan loop. Delivery is at-least-once:
//! a scan loop that starts over a non-empty queue clears stale in-flight
//! marks first, so items claimed by a worker that died are picked up again.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use colloquy_core::domain::deferred::DeferredWorkItem;
use colloquy_core::domain::repository::DeferredWorkQueue;
use colloquy_core::EngineError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct QueueEntry {
    item: DeferredWorkItem,
    in_flight: bool,
}

/// Deferred work items behind an async lock, polled by `start`
#[derive(Debug, Default)]
pub struct InMemoryDeferredWorkQueue {
    entries: RwLock<HashMap<String, QueueEntry>>,
    failed: RwLock<HashMap<String, DeferredWorkItem>>,
}

impl InMemoryDeferredWorkQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Items that exhausted their retries
    pub async fn failed_items(&self) -> Vec<DeferredWorkItem> {
        self.failed.read().await.values().cloned().collect()
    }

    /// Start the scan loop, returning the receiver a worker drains.
    ///
    /// Every in-flight mark is cleared before the first pass; a mark only
    /// means some earlier loop handed the item out, and that loop is gone.
    /// The loop ends when the receiver is dropped.
    pub fn start(
        self: Arc<Self>,
        poll_interval: Duration,
        buffer: usize,
    ) -> mpsc::Receiver<DeferredWorkItem> {
        let (tx, rx) = mpsc::channel(buffer);

        tokio::spawn(async move {
            {
                let mut entries = self.entries.write().await;
                for entry in entries.values_mut() {
                    if entry.in_flight {
                        debug!(item_id = %entry.item.id, "Reclaiming in-flight work item");
                        entry.in_flight = false;
                    }
                }
            }

            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let due = match self.take_due(Utc::now()).await {
                    Ok(due) => due,
                    Err(e) => {
                        warn!("Deferred work scan failed: {}", e);
                        continue;
                    }
                };
                for item in due {
                    if tx.send(item).await.is_err() {
                        debug!("Deferred work receiver dropped, stopping scan loop");
                        return;
                    }
                }
            }
        });

        rx
    }
}

#[async_trait]
impl DeferredWorkQueue for InMemoryDeferredWorkQueue {
    async fn enqueue(&self, item: DeferredWorkItem) -> Result<(), EngineError> {
        debug!(item_id = %item.id, due_at = %item.due_at, "Enqueueing deferred work");
        self.entries.write().await.insert(
            item.id.clone(),
            QueueEntry {
                item,
                in_flight: false,
            },
        );
        Ok(())
    }

    async fn ack(&self, id: &str) -> Result<(), EngineError> {
        self.entries.write().await.remove(id);
        Ok(())
    }

    async fn reschedule(
        &self,
        id: &str,
        due_at: DateTime<Utc>,
        attempts: u32,
    ) -> Result<(), EngineError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| EngineError::QueueError(format!("Unknown work item: {}", id)))?;
        entry.item.due_at = due_at;
        entry.item.attempts = attempts;
        entry.in_flight = false;
        Ok(())
    }

    async fn fail(&self, id: &str) -> Result<(), EngineError> {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.remove(id) {
            warn!(item_id = %id, attempts = entry.item.attempts, "Deferred work item failed permanently");
            self.failed.write().await.insert(id.to_string(), entry.item);
        }
        Ok(())
    }

    async fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<DeferredWorkItem>, EngineError> {
        let mut entries = self.entries.write().await;
        let mut due = Vec::new();
        for entry in entries.values_mut() {
            if !entry.in_flight && entry.item.is_due(now) {
                entry.in_flight = true;
                due.push(entry.item.clone());
            }
        }
        due.sort_by_key(|item| item.due_at);
        Ok(due)
    }

    async fn pending(&self) -> Result<Vec<DeferredWorkItem>, EngineError> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .map(|e| e.item.clone())
            .collect())
    }
}
