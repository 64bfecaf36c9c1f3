//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Keychain service name under which Slack tokens are stored.
pub const KEYRING_SERVICE: &str = "agent-relay";

/// Nested Slack configuration for Socket Mode connectivity.
///
/// Tokens are loaded at runtime via OS keychain or environment variables,
/// never from the TOML config file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SlackConfig {
    /// App-level token used for Socket Mode (populated at runtime).
    #[serde(skip)]
    pub app_token: String,
    /// Bot user token used for posting messages (populated at runtime).
    #[serde(skip)]
    pub bot_token: String,
}

/// How the worker CLI is invoked.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Worker binary name or absolute path (resolved at startup).
    #[serde(default = "default_worker_binary")]
    pub binary: String,
    /// Extra arguments placed before the prompt on every invocation.
    #[serde(default = "default_worker_args")]
    pub args: Vec<String>,
    /// Hard wall-clock limit for one invocation.
    #[serde(default = "default_worker_timeout")]
    pub timeout_seconds: u64,
    /// Prompt sent to compact the context after an overflow.
    #[serde(default = "default_compact_prompt")]
    pub compact_prompt: String,
    /// Prompt sent after compaction to resume the interrupted work.
    #[serde(default = "default_continue_prompt")]
    pub continue_prompt: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            binary: default_worker_binary(),
            args: default_worker_args(),
            timeout_seconds: default_worker_timeout(),
            compact_prompt: default_compact_prompt(),
            continue_prompt: default_continue_prompt(),
        }
    }
}

impl WorkerConfig {
    /// Invocation timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_worker_binary() -> String {
    "claude".into()
}

fn default_worker_args() -> Vec<String> {
    vec!["--dangerously-skip-permissions".into()]
}

fn default_worker_timeout() -> u64 {
    600
}

fn default_compact_prompt() -> String {
    "/compact".into()
}

fn default_continue_prompt() -> String {
    "The context was just compacted. Continue the previous task where you left off.".into()
}

/// Thresholds driving the incremental renderer.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RenderConfig {
    /// Flush buffered text when this much time passed since the last flush.
    #[serde(default = "default_text_flush_ms")]
    pub text_flush_ms: u64,
    /// Flush early once the buffer reaches this many characters...
    #[serde(default = "default_text_flush_chars")]
    pub text_flush_chars: usize,
    /// ...and at least this much time passed since the last flush.
    #[serde(default = "default_text_flush_min_ms")]
    pub text_flush_min_ms: u64,
    /// Rolling window for coalescing same-category tool calls.
    #[serde(default = "default_tool_batch_ms")]
    pub tool_batch_ms: u64,
    /// Tool results up to this many characters are shown inline.
    #[serde(default = "default_inline_result_chars")]
    pub inline_result_chars: usize,
    /// Silence before the "still working" indicator appears.
    #[serde(default = "default_heartbeat_idle")]
    pub heartbeat_idle_seconds: u64,
    /// Resolution of the heartbeat ticker.
    #[serde(default = "default_heartbeat_tick_ms")]
    pub heartbeat_tick_ms: u64,
    /// Combined token usage above which a soft note is appended.
    #[serde(default = "default_soft_watermark")]
    pub soft_token_watermark: u64,
    /// Combined token usage above which a hard warning is appended.
    #[serde(default = "default_hard_watermark")]
    pub hard_token_watermark: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            text_flush_ms: default_text_flush_ms(),
            text_flush_chars: default_text_flush_chars(),
            text_flush_min_ms: default_text_flush_min_ms(),
            tool_batch_ms: default_tool_batch_ms(),
            inline_result_chars: default_inline_result_chars(),
            heartbeat_idle_seconds: default_heartbeat_idle(),
            heartbeat_tick_ms: default_heartbeat_tick_ms(),
            soft_token_watermark: default_soft_watermark(),
            hard_token_watermark: default_hard_watermark(),
        }
    }
}

impl RenderConfig {
    /// Maximum silence between text flushes.
    #[must_use]
    pub fn text_flush_interval(&self) -> Duration {
        Duration::from_millis(self.text_flush_ms)
    }

    /// Minimum spacing between size-triggered text flushes.
    #[must_use]
    pub fn text_flush_min_interval(&self) -> Duration {
        Duration::from_millis(self.text_flush_min_ms)
    }

    /// Tool batch window.
    #[must_use]
    pub fn tool_batch_window(&self) -> Duration {
        Duration::from_millis(self.tool_batch_ms)
    }

    /// Silence before the heartbeat shows.
    #[must_use]
    pub fn heartbeat_idle(&self) -> Duration {
        Duration::from_secs(self.heartbeat_idle_seconds)
    }

    /// Heartbeat ticker resolution.
    #[must_use]
    pub fn heartbeat_tick(&self) -> Duration {
        Duration::from_millis(self.heartbeat_tick_ms.max(1))
    }
}

fn default_text_flush_ms() -> u64 {
    500
}

fn default_text_flush_chars() -> usize {
    500
}

fn default_text_flush_min_ms() -> u64 {
    200
}

fn default_tool_batch_ms() -> u64 {
    1000
}

fn default_inline_result_chars() -> usize {
    1000
}

fn default_heartbeat_idle() -> u64 {
    5
}

fn default_heartbeat_tick_ms() -> u64 {
    1000
}

fn default_soft_watermark() -> u64 {
    100_000
}

fn default_hard_watermark() -> u64 {
    150_000
}

fn default_max_workers() -> usize {
    4
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Default working directory for conversations without their own folder.
    pub default_workspace_root: PathBuf,
    /// Slack connectivity settings.
    #[serde(default)]
    pub slack: SlackConfig,
    /// Authorized Slack user IDs allowed to talk to the relay.
    pub authorized_user_ids: Vec<String>,
    /// Maximum simultaneously running worker invocations across channels.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Directory holding the continuation snapshots.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    /// Worker invocation settings.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Renderer thresholds.
    #[serde(default)]
    pub render: RenderConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load Slack credentials from OS keychain with env-var fallback.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither keychain nor env vars provide
    /// the required tokens.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.slack.app_token = load_credential("slack_app_token", "SLACK_APP_TOKEN").await?;
        self.slack.bot_token = load_credential("slack_bot_token", "SLACK_BOT_TOKEN").await?;
        Ok(())
    }

    /// Directory where continuation snapshots live.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| self.default_workspace_root.join(".agent-relay"))
    }

    /// Validate that a Slack user is authorized to talk to the relay.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Unauthorized` if the user is not in the allowed list.
    pub fn ensure_authorized(&self, user_id: &str) -> Result<()> {
        if self.authorized_user_ids.iter().any(|id| id == user_id) {
            Ok(())
        } else {
            Err(AppError::Unauthorized("user is not authorized".into()))
        }
    }

    fn validate(&mut self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(AppError::Config(
                "max_workers must be greater than zero".into(),
            ));
        }

        if self.authorized_user_ids.is_empty() {
            return Err(AppError::Config(
                "authorized_user_ids must not be empty".into(),
            ));
        }

        if self.worker.timeout_seconds == 0 {
            return Err(AppError::Config(
                "worker.timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.render.soft_token_watermark > self.render.hard_token_watermark {
            return Err(AppError::Config(
                "render.soft_token_watermark must not exceed hard_token_watermark".into(),
            ));
        }

        let canonical_root = self
            .default_workspace_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("default_workspace_root invalid: {err}")))?;
        self.default_workspace_root = canonical_root;

        Ok(())
    }
}

/// Locate the worker executable.
///
/// A name containing a path separator is taken as given. Otherwise the
/// per-user install location, `/usr/local/bin`, and every `PATH` entry are
/// searched in that order.
///
/// # Errors
///
/// Returns `AppError::Config` if no executable file is found.
pub fn resolve_worker_binary(binary: &str) -> Result<PathBuf> {
    let given = Path::new(binary);
    if given.components().count() > 1 {
        return if given.is_file() {
            Ok(given.to_path_buf())
        } else {
            Err(AppError::Config(format!(
                "worker binary {} does not exist",
                given.display()
            )))
        };
    }

    let mut candidates = Vec::new();
    if let Some(home) = env::var_os("HOME") {
        candidates.push(PathBuf::from(home).join(".claude").join("local").join(binary));
    }
    candidates.push(PathBuf::from("/usr/local/bin").join(binary));
    if let Some(path) = env::var_os("PATH") {
        candidates.extend(env::split_paths(&path).map(|dir| dir.join(binary)));
    }

    candidates
        .into_iter()
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| AppError::Config(format!("worker binary `{binary}` not found")))
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    env::var(env_key).map_err(|_| {
        AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))
    })
}
