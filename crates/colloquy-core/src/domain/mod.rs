//! Domain model for conversational flows
//!
//! Aggregates, events, and the repository traits the engine persists them
//! through. Everything here is storage-agnostic.

/// Deferred work items and retry arithmetic
pub mod deferred;
/// Activity events, sinks, and live notifications
pub mod events;
/// Flow definitions, nodes, and entry triggers
pub mod flow;
/// Group sessions with shared variables
pub mod group;
/// Repository traits and in-memory test implementations
pub mod repository;
/// Individual sessions and their lifecycle
pub mod session;
