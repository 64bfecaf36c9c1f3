//! Chat rendering of worker output.
//!
//! - [`renderer`]: per-invocation state machine turning stream events into
//!   post/update/delete operations.
//! - [`tools`]: tool categories used for batching, and call summaries.
//! - [`format`]: message splitting, markup conversion, statistics.

pub mod format;
pub mod renderer;
pub mod tools;

pub use renderer::{IncrementalRenderer, RenderOutcome};
