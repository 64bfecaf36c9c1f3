//! Shared application state handed to the Slack event handlers.

use std::sync::Arc;

use crate::config::GlobalConfig;
use crate::orchestrator::executor::SessionExecutor;
use crate::slack::client::SlackService;
use crate::slack::dispatcher::ChannelDispatcher;
use crate::slack::transport::ChatTransport;

/// Everything an inbound event needs to act on.
pub struct AppState {
    /// Validated configuration.
    pub config: Arc<GlobalConfig>,
    /// Task executor; also exposes the scheduler and continuation store.
    pub executor: Arc<SessionExecutor>,
    /// Outbound chat operations.
    pub transport: Arc<dyn ChatTransport>,
    /// Slack client for file downloads; `None` when running without Slack.
    pub slack: Option<Arc<SlackService>>,
    /// Per-channel queues that keep inbound messages in arrival order.
    pub dispatcher: ChannelDispatcher,
}
