//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Slack API or Socket Mode failure.
    Slack(String),
    /// Worker process could not be spawned or its pipes could not be read.
    Worker(String),
    /// Continuation snapshot could not be loaded or persisted.
    Store(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Worker run exceeded its wall-clock budget and was killed.
    Timeout(String),
    /// Worker run was cancelled on request and killed.
    Cancelled(String),
    /// The relay is shutting down; no new work is admitted.
    Shutdown(String),
    /// Caller is not authorized to perform the requested action.
    Unauthorized(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Slack(msg) => write!(f, "slack: {msg}"),
            Self::Worker(msg) => write!(f, "worker: {msg}"),
            Self::Store(msg) => write!(f, "store: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::Shutdown(msg) => write!(f, "shutdown: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Whether this error ended a worker run on purpose (timeout or cancel)
    /// rather than through a failure of the worker itself.
    #[must_use]
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Cancelled(_))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(format!("invalid snapshot: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
