//! Persistence layer modules.
//!
//! State that must survive a restart is small (one continuation token per
//! conversation plus a few flags), so it lives in JSON snapshots rewritten
//! atomically after every mutation.

pub mod continuation_store;
pub mod snapshot;
