//! Deferred work worker
//!
//! Consumes due work items and feeds them back into the engine. Delivery is
//! at-least-once: an item is acked only after the engine processed it, and
//! failures are retried with exponential backoff until the attempt budget
//! runs out, after which the item is parked as failed and logged.

use crate::application::engine::FlowEngine;
use crate::config::DeferredConfig;
use crate::domain::deferred::{retry_backoff, DeferredWorkItem, WorkTarget};
use crate::domain::events::{kind, ActivityEvent, ActivitySink, ActivityTarget};
use crate::domain::repository::DeferredWorkQueue;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Processes deferred work items against the engine
pub struct DeferredWorker {
    engine: Arc<FlowEngine>,
    queue: Arc<dyn DeferredWorkQueue>,
    activity: Arc<dyn ActivitySink>,
    config: DeferredConfig,
}

impl DeferredWorker {
    /// Create a worker
    pub fn new(
        engine: Arc<FlowEngine>,
        queue: Arc<dyn DeferredWorkQueue>,
        activity: Arc<dyn ActivitySink>,
        config: DeferredConfig,
    ) -> Self {
        Self {
            engine,
            queue,
            activity,
            config,
        }
    }

    /// Consume deliveries from the channel until it closes
    pub fn spawn(self, mut rx: mpsc::Receiver<DeferredWorkItem>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                self.process(item).await;
            }
            debug!("Deferred work channel closed, worker stopping");
        })
    }

    /// Process one delivery of a work item
    pub async fn process(&self, item: DeferredWorkItem) {
        match self.engine.resume(&item).await {
            Ok(report) => {
                if let Err(e) = self.queue.ack(&item.id).await {
                    error!(item_id = %item.id, error = %e, "Could not ack work item");
                }
                debug!(
                    item_id = %item.id,
                    ignored = report.ignored,
                    "Deferred work processed"
                );
            }
            Err(e) => {
                let next_attempt = item.attempts + 1;
                if !e.is_retryable() || next_attempt >= self.config.max_attempts {
                    if let Err(fail_err) = self.queue.fail(&item.id).await {
                        error!(item_id = %item.id, error = %fail_err, "Could not park failed work item");
                    }
                    self.activity
                        .record(
                            ActivityEvent::error(
                                kind::DEFERRED_FAILED,
                                target_for(&item),
                                format!(
                                    "Deferred work {} gave up after {} attempts: {}",
                                    item.id, next_attempt, e
                                ),
                            )
                            .with_metadata(json!({
                                "attempts": next_attempt,
                                "error": e.to_string(),
                            })),
                        )
                        .await;
                } else {
                    let delay = retry_backoff(
                        next_attempt,
                        self.config.retry_base_delay_ms,
                        self.config.retry_max_delay_ms,
                    );
                    let due_at = Utc::now()
                        + chrono::Duration::from_std(delay).unwrap_or_else(|_| {
                            chrono::Duration::milliseconds(self.config.retry_max_delay_ms as i64)
                        });
                    warn!(
                        item_id = %item.id,
                        attempt = next_attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Deferred work failed, retrying"
                    );
                    if let Err(resched_err) =
                        self.queue.reschedule(&item.id, due_at, next_attempt).await
                    {
                        error!(item_id = %item.id, error = %resched_err, "Could not reschedule work item");
                    }
                }
            }
        }
    }
}

fn target_for(item: &DeferredWorkItem) -> ActivityTarget {
    match &item.target {
        WorkTarget::Session { session_key } => ActivityTarget::session(session_key),
        WorkTarget::Group { group_id } => ActivityTarget::group(group_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dispatch::RecordingChannelAdapter;
    use crate::application::engine::EngineStores;
    use crate::config::EngineConfig;
    use crate::domain::deferred::WorkPayload;
    use crate::domain::events::RecordingActivitySink;
    use crate::domain::repository::memory::{
        MemoryDeferredWorkQueue, MemoryFlowDefinitionRepository, MemoryGroupSessionRepository,
        MemoryRecordStore, MemorySessionRepository, MemorySharedStateStore,
    };
    use crate::domain::repository::SessionRepository;
    use crate::domain::session::{Session, SessionKey};
    use crate::error::EngineError;
    use crate::registry::HandlerRegistry;
    use crate::types::ChatId;
    use async_trait::async_trait;

    // Session repository whose reads always fail, to drive the retry path
    struct BrokenSessions;

    #[async_trait]
    impl SessionRepository for BrokenSessions {
        async fn insert_new(&self, _session: Session) -> Result<Session, EngineError> {
            Err(EngineError::StateStoreError("store down".to_string()))
        }

        async fn find_active(&self, _key: &SessionKey) -> Result<Option<Session>, EngineError> {
            Err(EngineError::StateStoreError("store down".to_string()))
        }

        async fn find_active_by_chat(
            &self,
            _chat_id: &ChatId,
        ) -> Result<Option<Session>, EngineError> {
            Err(EngineError::StateStoreError("store down".to_string()))
        }

        async fn find(&self, _key: &SessionKey) -> Result<Option<Session>, EngineError> {
            Err(EngineError::StateStoreError("store down".to_string()))
        }

        async fn update(
            &self,
            _session: &Session,
            _expected_version: u64,
        ) -> Result<Session, EngineError> {
            Err(EngineError::StateStoreError("store down".to_string()))
        }

        async fn expire_idle(
            &self,
            _ttl: chrono::Duration,
        ) -> Result<Vec<Session>, EngineError> {
            Err(EngineError::StateStoreError("store down".to_string()))
        }
    }

    fn worker_with_sessions(
        sessions: Arc<dyn SessionRepository>,
    ) -> (DeferredWorker, Arc<MemoryDeferredWorkQueue>, Arc<RecordingActivitySink>) {
        let queue = Arc::new(MemoryDeferredWorkQueue::new());
        let activity = Arc::new(RecordingActivitySink::new());
        let stores = EngineStores {
            flows: Arc::new(MemoryFlowDefinitionRepository::new()),
            sessions,
            groups: Arc::new(MemoryGroupSessionRepository::new()),
            queue: queue.clone(),
            records: Arc::new(MemoryRecordStore::new()),
            shared: Arc::new(MemorySharedStateStore::new()),
        };
        let engine = Arc::new(FlowEngine::new(
            stores,
            Arc::new(HandlerRegistry::new()),
            Arc::new(RecordingChannelAdapter::new()),
            activity.clone(),
            EngineConfig::default(),
        ));
        let worker = DeferredWorker::new(
            engine,
            queue.clone(),
            activity.clone(),
            DeferredConfig::default(),
        );
        (worker, queue, activity)
    }

    fn session_item() -> DeferredWorkItem {
        DeferredWorkItem::new(
            WorkTarget::Session {
                session_key: SessionKey("f1:c1".to_string()),
            },
            Utc::now(),
            WorkPayload::Continue,
        )
    }

    #[tokio::test]
    async fn test_processed_item_is_acked() {
        let (worker, queue, _) =
            worker_with_sessions(Arc::new(MemorySessionRepository::new()));
        let item = session_item();
        queue.enqueue(item.clone()).await.unwrap();

        worker.process(item).await;
        assert!(queue.pending().await.unwrap().is_empty());
        assert!(queue.failed_items().is_empty());
    }

    #[tokio::test]
    async fn test_retryable_failure_reschedules_with_backoff() {
        let (worker, queue, _) = worker_with_sessions(Arc::new(BrokenSessions));
        let item = session_item();
        queue.enqueue(item.clone()).await.unwrap();

        worker.process(item.clone()).await;

        let pending = queue.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert!(pending[0].due_at > Utc::now());
    }

    #[tokio::test]
    async fn test_exhausted_retries_park_the_item() {
        let (worker, queue, activity) = worker_with_sessions(Arc::new(BrokenSessions));
        let mut item = session_item();
        item.attempts = 4; // next delivery is the fifth and last attempt
        queue.enqueue(item.clone()).await.unwrap();

        worker.process(item).await;

        assert!(queue.pending().await.unwrap().is_empty());
        assert_eq!(queue.failed_items().len(), 1);
        let failures = activity.of_kind(kind::DEFERRED_FAILED);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].metadata["attempts"], 5);
    }

    #[tokio::test]
    async fn test_spawn_drains_channel_until_close() {
        let (worker, queue, _) =
            worker_with_sessions(Arc::new(MemorySessionRepository::new()));
        let item = session_item();
        queue.enqueue(item.clone()).await.unwrap();

        let (tx, rx) = mpsc::channel(4);
        let handle = worker.spawn(rx);
        tx.send(item).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(queue.pending().await.unwrap().is_empty());
    }
}
