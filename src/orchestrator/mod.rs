//! Task orchestration.
//!
//! Covers per-conversation admission and the global worker pool
//! ([`scheduler`]), end-to-end task execution ([`executor`]), and the
//! per-invocation heartbeat ticker ([`heartbeat`]).

pub mod executor;
pub mod heartbeat;
pub mod scheduler;
