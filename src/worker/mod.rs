//! Worker process plumbing.
//!
//! The worker is a headless agent CLI that prints one JSON object per line
//! on stdout. This module spawns it, frames its stdout into lines, and
//! decodes each line into [`StreamEvent`](crate::models::event::StreamEvent)s.
//!
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing with a line cap.
//! - `decoder`: lenient per-line decoding; unknown shapes are skipped.
//! - `runner`: argument construction, spawning, timeout, and cancellation.

pub mod codec;
pub mod decoder;
pub mod runner;
