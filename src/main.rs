#![forbid(unsafe_code)]

//! `agent-relay`: Slack relay binary.
//!
//! Bootstraps configuration, the continuation store, the worker pool, and the
//! Slack Socket Mode listener, then runs until ctrl-c or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_relay::app::AppState;
use agent_relay::config::{resolve_worker_binary, GlobalConfig};
use agent_relay::orchestrator::executor::SessionExecutor;
use agent_relay::orchestrator::scheduler::ConversationScheduler;
use agent_relay::persistence::continuation_store::ContinuationStore;
use agent_relay::slack::client::SlackService;
use agent_relay::slack::dispatcher::ChannelDispatcher;
use agent_relay::slack::transport::ChatTransport;
use agent_relay::worker::runner::ProcessRunner;
use agent_relay::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-relay", about = "Slack relay for headless coding agents", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the default workspace root.
    #[arg(long)]
    workspace: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-relay bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;

    if let Some(ws) = args.workspace {
        config.default_workspace_root = ws
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid workspace override: {err}")))?;
    }

    config.load_credentials().await?;
    let worker_binary = resolve_worker_binary(&config.worker.binary)?;
    let config = Arc::new(config);
    info!(
        workspace = %config.default_workspace_root.display(),
        worker = %worker_binary.display(),
        max_workers = config.max_workers,
        "configuration loaded"
    );

    // ── Shared state ────────────────────────────────────
    let store = Arc::new(ContinuationStore::open(config.state_dir())?);
    let scheduler = Arc::new(ConversationScheduler::new(config.max_workers));
    let runner = ProcessRunner::from_config(worker_binary, &config.worker);

    let slack = Arc::new(SlackService::start(&config.slack).map_err(|err| {
        error!(%err, "slack service start failed");
        err
    })?);
    let transport: Arc<dyn ChatTransport> = slack.clone();

    let shutdown = CancellationToken::new();
    let executor = Arc::new(SessionExecutor::new(
        scheduler,
        store,
        runner,
        Arc::clone(&transport),
        config.worker.clone(),
        config.render.clone(),
        shutdown.clone(),
    ));

    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        executor,
        transport,
        slack: Some(Arc::clone(&slack)),
        dispatcher: ChannelDispatcher::default(),
    });

    // ── Slack Socket Mode ───────────────────────────────
    let socket = slack.spawn_socket_mode(state);
    info!("agent-relay ready");

    shutdown_signal().await;
    info!("shutdown signal received");

    // Cancels every running worker through its child token.
    shutdown.cancel();
    socket.abort();
    if let Err(err) = socket.await {
        if !err.is_cancelled() {
            error!(%err, "socket mode task failed");
        }
    }

    info!("agent-relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
