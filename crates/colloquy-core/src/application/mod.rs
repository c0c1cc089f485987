//! Application services
//!
//! The engine and the machinery around it: effect dispatch, per-key locks,
//! the deferred worker, and the runtime facade.

/// Outbound effect dispatch and the channel adapter seam
pub mod dispatch;
/// The flow execution engine
pub mod engine;
/// Per-key execution locks
pub mod locks;
/// Runtime facade wiring engine, worker, and expiry sweep
pub mod runtime;
/// Deferred work worker
pub mod worker;
