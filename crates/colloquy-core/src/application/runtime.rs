//! Engine runtime facade
//!
//! Wires the engine, the deferred worker, and the expiry sweep together and
//! exposes the operations an embedding service needs: deploying flows,
//! flipping activation, feeding events, and inspecting state.

use crate::application::dispatch::ChannelAdapter;
use crate::application::engine::{EngineReport, EngineStores, FlowEngine};
use crate::application::worker::DeferredWorker;
use crate::config::EngineConfig;
use crate::domain::deferred::DeferredWorkItem;
use crate::domain::events::{
    kind, ActivityEvent, ActivitySink, ActivityTarget, SessionNotification,
};
use crate::domain::flow::{FlowDefinition, FlowId};
use crate::domain::group::{GroupSession, GroupSessionId};
use crate::domain::session::{Session, SessionKey};
use crate::error::EngineError;
use crate::registry::HandlerRegistry;
use crate::types::InboundEvent;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::error;

/// Facade over the engine and its background tasks
pub struct EngineRuntime {
    engine: Arc<FlowEngine>,
}

impl EngineRuntime {
    /// Assemble a runtime from stores, handlers, a channel, and a sink
    pub fn new(
        stores: EngineStores,
        registry: Arc<HandlerRegistry>,
        channel: Arc<dyn ChannelAdapter>,
        activity: Arc<dyn ActivitySink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            engine: Arc::new(FlowEngine::new(stores, registry, channel, activity, config)),
        }
    }

    /// The engine itself, for direct use
    pub fn engine(&self) -> Arc<FlowEngine> {
        self.engine.clone()
    }

    /// Validate and persist a flow definition
    pub async fn deploy_flow(&self, flow: FlowDefinition) -> Result<FlowDefinition, EngineError> {
        flow.validate()?;
        let flow = self.engine.stores().flows.save(flow).await?;
        self.engine
            .activity()
            .record(ActivityEvent::info(
                kind::FLOW_DEPLOYED,
                ActivityTarget::flow(&flow.id),
                format!("Flow '{}' deployed with {} nodes", flow.name, flow.nodes.len()),
            ))
            .await;
        Ok(flow)
    }

    /// Activate or deactivate a flow. Sessions on a deactivated flow fail
    /// closed on their next step.
    pub async fn set_flow_active(
        &self,
        id: &FlowId,
        active: bool,
    ) -> Result<FlowDefinition, EngineError> {
        let flow = self.engine.stores().flows.set_active(id, active).await?;
        self.engine
            .activity()
            .record(ActivityEvent::info(
                kind::FLOW_ACTIVATION_CHANGED,
                ActivityTarget::flow(id),
                if active {
                    format!("Flow '{}' activated", flow.name)
                } else {
                    format!("Flow '{}' deactivated", flow.name)
                },
            ))
            .await;
        Ok(flow)
    }

    /// Feed one inbound chat event to the engine
    pub async fn handle_event(&self, event: InboundEvent) -> Result<EngineReport, EngineError> {
        self.engine.handle_event(event).await
    }

    /// Inspect a session regardless of status
    pub async fn session(&self, key: &SessionKey) -> Result<Option<Session>, EngineError> {
        self.engine.stores().sessions.find(key).await
    }

    /// Inspect a group session
    pub async fn group(
        &self,
        id: &GroupSessionId,
    ) -> Result<Option<GroupSession>, EngineError> {
        self.engine.stores().groups.find(id).await
    }

    /// Subscribe to live session state changes
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotification> {
        self.engine.notifier().subscribe()
    }

    /// Start the deferred worker over a delivery channel. The returned task
    /// runs until the channel closes.
    pub fn start_worker(&self, rx: mpsc::Receiver<DeferredWorkItem>) -> JoinHandle<()> {
        let worker = DeferredWorker::new(
            self.engine.clone(),
            self.engine.stores().queue.clone(),
            self.engine.activity(),
            self.engine.config().deferred.clone(),
        );
        worker.spawn(rx)
    }

    /// Start the periodic idle-session expiry sweep
    pub fn start_expiry_sweep(&self) -> JoinHandle<()> {
        let engine = self.engine.clone();
        let interval =
            std::time::Duration::from_secs(engine.config().expiry_sweep_interval_seconds.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = engine.expire_idle().await {
                    error!(error = %e, "Expiry sweep failed");
                }
            }
        })
    }
}
