//! Outbound effect dispatch
//!
//! Messages are sent only after session state is durably written, in the
//! order the handlers produced them. Redeliveries of the same work item are
//! deduplicated through shared-state marks so retries stay at-most-once per
//! effect on the wire.

use crate::domain::repository::SharedStateStore;
use crate::error::EngineError;
use crate::types::OutboundMessage;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

const DISPATCH_SCOPE: &str = "dispatch";

/// Transport that delivers messages to a chat channel
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Deliver one message
    async fn send(&self, message: &OutboundMessage) -> Result<(), EngineError>;
}

/// Sends handler effects through a channel adapter
pub struct EffectDispatcher {
    channel: Arc<dyn ChannelAdapter>,
    shared: Arc<dyn SharedStateStore>,
    dedupe_ttl_ms: u64,
}

impl EffectDispatcher {
    /// Create a dispatcher
    pub fn new(
        channel: Arc<dyn ChannelAdapter>,
        shared: Arc<dyn SharedStateStore>,
        dedupe_ttl_ms: u64,
    ) -> Self {
        Self {
            channel,
            shared,
            dedupe_ttl_ms,
        }
    }

    /// Send effects in order. When an idempotency key is given, each effect
    /// is marked after a successful send and skipped on redelivery.
    /// Returns the number of messages actually sent; send failures are
    /// logged and do not fail the engine pass.
    pub async fn dispatch(
        &self,
        effects: Vec<OutboundMessage>,
        idempotency: Option<&str>,
    ) -> usize {
        let mut sent = 0;
        for (index, message) in effects.into_iter().enumerate() {
            let mark = idempotency.map(|base| format!("{}:{}", base, index));
            if let Some(key) = &mark {
                match self.shared.get(DISPATCH_SCOPE, key).await {
                    Ok(Some(_)) => {
                        debug!(key = %key, "Effect already sent, skipping");
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(key = %key, error = %e, "Dedupe check failed, sending anyway");
                    }
                }
            }

            match self.channel.send(&message).await {
                Ok(()) => {
                    sent += 1;
                    if let Some(key) = &mark {
                        if let Err(e) = self
                            .shared
                            .set_with_ttl(DISPATCH_SCOPE, key, json!(true), self.dedupe_ttl_ms)
                            .await
                        {
                            warn!(key = %key, error = %e, "Could not mark effect as sent");
                        }
                    }
                }
                Err(e) => {
                    warn!(chat_id = %message.chat_id, error = %e, "Channel send failed");
                }
            }
        }
        sent
    }

    /// Send one message per recipient concurrently, deduplicated per index
    /// under the given idempotency key. Returns the number sent.
    pub async fn broadcast(
        &self,
        messages: Vec<OutboundMessage>,
        idempotency_key: &str,
    ) -> usize {
        let sends = messages.into_iter().enumerate().map(|(index, message)| {
            let key = format!("{}:{}", idempotency_key, index);
            async move {
                match self.shared.get(DISPATCH_SCOPE, &key).await {
                    Ok(Some(_)) => {
                        debug!(key = %key, "Broadcast message already sent, skipping");
                        return false;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(key = %key, error = %e, "Dedupe check failed, sending anyway");
                    }
                }
                match self.channel.send(&message).await {
                    Ok(()) => {
                        if let Err(e) = self
                            .shared
                            .set_with_ttl(DISPATCH_SCOPE, &key, json!(true), self.dedupe_ttl_ms)
                            .await
                        {
                            warn!(key = %key, error = %e, "Could not mark broadcast as sent");
                        }
                        true
                    }
                    Err(e) => {
                        warn!(chat_id = %message.chat_id, error = %e, "Broadcast send failed");
                        false
                    }
                }
            }
        });
        join_all(sends).await.into_iter().filter(|ok| *ok).count()
    }
}

/// Channel adapter that collects messages in memory, for tests
#[cfg(feature = "testing")]
#[derive(Debug, Default)]
pub struct RecordingChannelAdapter {
    sent: std::sync::Mutex<Vec<OutboundMessage>>,
}

#[cfg(feature = "testing")]
impl RecordingChannelAdapter {
    /// Create an empty adapter
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of delivered messages, in send order
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().map(|m| m.clone()).unwrap_or_default()
    }

    /// Texts of delivered messages, in send order
    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m.body {
                crate::types::MessageBody::Text(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[cfg(feature = "testing")]
#[async_trait]
impl ChannelAdapter for RecordingChannelAdapter {
    async fn send(&self, message: &OutboundMessage) -> Result<(), EngineError> {
        self.sent
            .lock()
            .map_err(|e| EngineError::Other(format!("lock poisoned: {}", e)))?
            .push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::memory::MemorySharedStateStore;
    use crate::types::ChatId;
    use mockall::mock;
    use mockall::predicate::always;

    mock! {
        Channel {}

        #[async_trait]
        impl ChannelAdapter for Channel {
            async fn send(&self, message: &OutboundMessage) -> Result<(), EngineError>;
        }
    }

    fn dispatcher(channel: Arc<dyn ChannelAdapter>) -> EffectDispatcher {
        EffectDispatcher::new(channel, Arc::new(MemorySharedStateStore::new()), 60000)
    }

    fn messages(n: usize) -> Vec<OutboundMessage> {
        (0..n)
            .map(|i| OutboundMessage::text(ChatId("c1".to_string()), format!("msg-{}", i)))
            .collect()
    }

    #[tokio::test]
    async fn test_dispatch_preserves_order() {
        let channel = Arc::new(RecordingChannelAdapter::new());
        let dispatcher = dispatcher(channel.clone());

        let sent = dispatcher.dispatch(messages(3), None).await;
        assert_eq!(sent, 3);
        assert_eq!(channel.texts(), vec!["msg-0", "msg-1", "msg-2"]);
    }

    #[tokio::test]
    async fn test_dispatch_dedupes_redelivery() {
        let channel = Arc::new(RecordingChannelAdapter::new());
        let dispatcher = dispatcher(channel.clone());

        let first = dispatcher.dispatch(messages(2), Some("work:abc")).await;
        assert_eq!(first, 2);
        let second = dispatcher.dispatch(messages(2), Some("work:abc")).await;
        assert_eq!(second, 0);
        assert_eq!(channel.sent().len(), 2);

        // A different key sends again
        let third = dispatcher.dispatch(messages(2), Some("work:def")).await;
        assert_eq!(third, 2);
    }

    #[tokio::test]
    async fn test_send_failure_does_not_abort_remaining() {
        let mut mock = MockChannel::new();
        let mut call = 0;
        mock.expect_send()
            .with(always())
            .times(3)
            .returning(move |_| {
                call += 1;
                if call == 2 {
                    Err(EngineError::ExternalCallError("down".to_string()))
                } else {
                    Ok(())
                }
            });

        let dispatcher = dispatcher(Arc::new(mock));
        let sent = dispatcher.dispatch(messages(3), None).await;
        assert_eq!(sent, 2);
    }

    #[tokio::test]
    async fn test_broadcast_dedupes_per_recipient() {
        let channel = Arc::new(RecordingChannelAdapter::new());
        let dispatcher = dispatcher(channel.clone());

        let recipients: Vec<OutboundMessage> = ["alice", "bob", "carol"]
            .iter()
            .map(|chat| OutboundMessage::text(ChatId(chat.to_string()), "ping"))
            .collect();

        let first = dispatcher.broadcast(recipients.clone(), "work:g1").await;
        assert_eq!(first, 3);
        let second = dispatcher.broadcast(recipients, "work:g1").await;
        assert_eq!(second, 0);
        assert_eq!(channel.sent().len(), 3);
    }
}
