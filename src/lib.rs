#![forbid(unsafe_code)]

//! `agent-relay`: bridges Slack channels to a headless coding-agent CLI.
//!
//! Each channel is one conversation. Prompts are queued per conversation,
//! run as worker subprocesses bounded by a global pool, and their
//! line-delimited JSON output is rendered incrementally back into Slack.

pub mod app;
pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod render;
pub mod slack;
pub mod worker;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
