//! Standard library of node handlers for the Colloquy flow engine
//!
//! Every built-in node kind ships as a [`NodeHandler`] in this crate. The
//! engine itself knows nothing about individual kinds; callers assemble a
//! [`HandlerRegistry`] with [`standard_registry`] and hand it over, optionally
//! registering their own handlers on top.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use colloquy_core::config::HttpConfig;
use colloquy_core::{HandlerRegistry, NodeHandler};
use std::sync::Arc;

pub mod handlers;

pub use handlers::condition::ConditionHandler;
pub use handlers::control::{EndHandler, StartHandler};
pub use handlers::database::DatabaseHandler;
pub use handlers::delay::{DelayHandler, TimerHandler};
pub use handlers::group::{
    GroupActionHandler, GroupCreateHandler, GroupJoinHandler, GroupLeaveHandler,
};
pub use handlers::loops::LoopHandler;
pub use handlers::messaging::{InputHandler, KeyboardHandler, MessageHandler};
pub use handlers::random::RandomHandler;
pub use handlers::variable::VariableHandler;
pub use handlers::webhook::HttpCallHandler;

/// Tunables shared by handlers that talk to the outside world
#[derive(Debug, Clone, Default)]
pub struct HandlerSettings {
    /// Outbound HTTP behavior for the webhook handler
    pub http: HttpConfig,
}

/// Build a registry containing every built-in handler.
///
/// The HTTP handler is registered once and aliased under `webhook`, `api`
/// and `integration`, so all three kinds share one client and retry policy.
pub fn standard_registry(settings: &HandlerSettings) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    registry.register(Arc::new(StartHandler));
    registry.register(Arc::new(MessageHandler));
    registry.register(Arc::new(KeyboardHandler));
    registry.register(Arc::new(InputHandler));
    registry.register(Arc::new(ConditionHandler));
    registry.register(Arc::new(RandomHandler));
    registry.register(Arc::new(VariableHandler));
    registry.register(Arc::new(DelayHandler));
    registry.register(Arc::new(TimerHandler));
    registry.register(Arc::new(LoopHandler));
    registry.register(Arc::new(DatabaseHandler));

    let http: Arc<dyn NodeHandler> = Arc::new(HttpCallHandler::new(settings.http.clone()));
    registry.register(http.clone());
    registry.register_as("api", http.clone());
    registry.register_as("integration", http);

    registry.register(Arc::new(GroupCreateHandler));
    registry.register(Arc::new(GroupJoinHandler));
    registry.register(Arc::new(GroupActionHandler));
    registry.register(Arc::new(GroupLeaveHandler));
    registry.register(Arc::new(EndHandler));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_contains_every_builtin_kind() {
        let registry = standard_registry(&HandlerSettings::default());

        for kind in [
            "start",
            "message",
            "keyboard",
            "input",
            "condition",
            "random",
            "variable",
            "delay",
            "timer",
            "loop",
            "database",
            "webhook",
            "api",
            "integration",
            "group_create",
            "group_join",
            "group_action",
            "group_leave",
            "end",
        ] {
            assert!(registry.contains(kind), "missing handler for kind {kind}");
        }

        assert!(registry.get("telepathy").is_err());
    }

    #[test]
    fn only_input_awaits_input() {
        let registry = standard_registry(&HandlerSettings::default());

        assert!(registry.awaits_input("input"));
        for kind in ["start", "message", "keyboard", "condition", "delay", "end"] {
            assert!(!registry.awaits_input(kind), "{kind} should not wait for input");
        }
    }
}
