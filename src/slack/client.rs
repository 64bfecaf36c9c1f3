//! Slack Web API client and Socket Mode listener.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use slack_morphism::prelude::{
    SlackApiChatDeleteRequest, SlackApiChatPostMessageRequest, SlackApiChatUpdateRequest,
    SlackApiConversationsArchiveRequest, SlackApiConversationsCreateRequest,
    SlackApiFilesComplete, SlackApiFilesCompleteUploadExternalRequest,
    SlackApiFilesGetUploadUrlExternalRequest, SlackApiReactionsAddRequest,
    SlackApiReactionsRemoveRequest, SlackApiToken, SlackApiTokenType, SlackApiTokenValue,
    SlackBlock, SlackChannelId, SlackClient, SlackClientEventsListenerEnvironment,
    SlackClientHyperHttpsConnector, SlackClientSession, SlackClientSocketModeConfig,
    SlackClientSocketModeListener, SlackMessageContent, SlackReactionName,
    SlackSocketModeListenerCallbacks, SlackTs,
};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::config::SlackConfig;
use crate::models::task::{Destination, MessageBody, MessageRef};
use crate::render::format::markdown_to_mrkdwn;
use crate::slack::transport::{ChatTransport, TransportFuture};
use crate::slack::{blocks, events};
use crate::{AppError, Result};

const MAX_ATTEMPTS: u32 = 4;
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Longest channel name Slack accepts.
const MAX_CHANNEL_NAME: usize = 80;

type SlackHttpClient = SlackClient<SlackClientHyperHttpsConnector>;

/// Slack Web API wrapper implementing [`ChatTransport`].
pub struct SlackService {
    client: Arc<SlackHttpClient>,
    bot_token: SlackApiToken,
    app_token: SlackApiToken,
    http: reqwest::Client,
}

impl SlackService {
    /// Create the Slack client.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if the HTTPS connector cannot be created.
    pub fn start(config: &SlackConfig) -> Result<Self> {
        let connector = SlackClientHyperHttpsConnector::new()
            .map_err(|err| AppError::Slack(format!("failed to init slack connector: {err}")))?;
        let client = Arc::new(SlackClient::new(connector));
        let bot_token = SlackApiToken {
            token_value: SlackApiTokenValue(config.bot_token.clone()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: Some(SlackApiTokenType::Bot),
        };
        let app_token = SlackApiToken {
            token_value: SlackApiTokenValue(config.app_token.clone()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: Some(SlackApiTokenType::App),
        };

        info!("slack client initialised");

        Ok(Self {
            client,
            bot_token,
            app_token,
            http: reqwest::Client::new(),
        })
    }

    /// Start the Socket Mode listener, dispatching into `state`.
    #[must_use]
    pub fn spawn_socket_mode(&self, state: Arc<AppState>) -> JoinHandle<()> {
        let listener_env = Arc::new(
            SlackClientEventsListenerEnvironment::new(Arc::clone(&self.client))
                .with_error_handler(|err, _client, _state| {
                    error!(?err, "socket mode error");
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR
                })
                .with_user_state(state),
        );
        let callbacks = SlackSocketModeListenerCallbacks::new()
            .with_hello_events(|event, _client, _state| async move {
                info!(?event, "socket hello");
            })
            .with_push_events(events::handle_push_event)
            .with_interaction_events(events::handle_interaction);
        let config = SlackClientSocketModeConfig {
            max_connections_count: SlackClientSocketModeConfig::DEFAULT_CONNECTIONS_COUNT,
            debug_connections: SlackClientSocketModeConfig::DEFAULT_DEBUG_CONNECTIONS,
            initial_backoff_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_INITIAL_BACKOFF_IN_SECONDS,
            reconnect_timeout_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_RECONNECT_TIMEOUT_IN_SECONDS,
            ping_interval_in_seconds: SlackClientSocketModeConfig::DEFAULT_PING_INTERVAL_IN_SECONDS,
            ping_failure_threshold_times:
                SlackClientSocketModeConfig::DEFAULT_PING_FAILURE_THRESHOLD_TIMES,
        };

        let listener = SlackClientSocketModeListener::new(&config, listener_env, callbacks);
        let app_token = self.app_token.clone();
        tokio::spawn(async move {
            if let Err(error) = listener.listen_for(&app_token).await {
                error!(?error, "socket mode listen failed");
                return;
            }

            listener.serve().await;
            info!("socket mode listener exited");
        })
    }

    /// Create an HTTP session for direct API calls using the bot token.
    #[must_use]
    pub fn http_session(&self) -> SlackClientSession<'_, SlackClientHyperHttpsConnector> {
        self.client.open_session(&self.bot_token)
    }

    /// Download a private Slack file into `dir`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if the download fails, or `AppError::Io`
    /// if the file cannot be written.
    pub async fn download_file(&self, url: &str, name: &str, dir: &Path) -> Result<PathBuf> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.bot_token.token_value.0)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| AppError::Slack(format!("failed to download file: {err}")))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| AppError::Slack(format!("failed to read file body: {err}")))?;

        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(sanitize_file_name(name));
        tokio::fs::write(&path, &bytes).await?;
        info!(path = %path.display(), bytes = bytes.len(), "downloaded slack file");
        Ok(path)
    }

    async fn post_message(
        &self,
        destination: &Destination,
        body: &MessageBody,
    ) -> Result<MessageRef> {
        let request = SlackApiChatPostMessageRequest {
            channel: SlackChannelId(destination.channel.clone()),
            content: message_content(body),
            as_user: None,
            icon_emoji: None,
            icon_url: None,
            link_names: Some(true),
            parse: None,
            thread_ts: destination.thread_ts.clone().map(SlackTs),
            username: None,
            reply_broadcast: None,
            unfurl_links: Some(false),
            unfurl_media: None,
        };

        let mut backoff = INITIAL_RETRY_DELAY;
        let mut attempt = 1;
        loop {
            match self.http_session().chat_post_message(&request).await {
                Ok(response) => {
                    debug!(channel = %destination.channel, ts = ?response.ts, "posted slack message");
                    return Ok(MessageRef::new(destination.channel.clone(), response.ts.0));
                }
                Err(error) if attempt < MAX_ATTEMPTS => {
                    let delay = retry_delay(&error, backoff);
                    warn!(?error, delay = ?delay, attempt, "slack post failed; retrying");
                    sleep(delay).await;
                    backoff = (backoff * 2).min(MAX_RETRY_DELAY);
                    attempt += 1;
                }
                Err(error) => {
                    return Err(AppError::Slack(format!("failed to post message: {error}")));
                }
            }
        }
    }

    async fn update_message(&self, message: &MessageRef, body: &MessageBody) -> Result<()> {
        let request = SlackApiChatUpdateRequest::new(
            SlackChannelId(message.channel.clone()),
            message_content(body),
            SlackTs(message.ts.clone()),
        );

        let mut backoff = INITIAL_RETRY_DELAY;
        let mut attempt = 1;
        loop {
            match self.http_session().chat_update(&request).await {
                Ok(_) => return Ok(()),
                Err(error) if attempt < MAX_ATTEMPTS && is_rate_limited(&error) => {
                    let delay = retry_delay(&error, backoff);
                    warn!(delay = ?delay, attempt, "slack update rate limited; retrying");
                    sleep(delay).await;
                    backoff = (backoff * 2).min(MAX_RETRY_DELAY);
                    attempt += 1;
                }
                Err(error) => {
                    return Err(AppError::Slack(format!("failed to update message: {error}")));
                }
            }
        }
    }

    async fn delete_message(&self, message: &MessageRef) -> Result<()> {
        let request = SlackApiChatDeleteRequest::new(
            SlackChannelId(message.channel.clone()),
            SlackTs(message.ts.clone()),
        );
        self.http_session()
            .chat_delete(&request)
            .await
            .map_err(|err| AppError::Slack(format!("failed to delete message: {err}")))?;
        Ok(())
    }

    async fn add_reaction_to(&self, message: &MessageRef, name: &str) -> Result<()> {
        let request = SlackApiReactionsAddRequest::new(
            SlackChannelId(message.channel.clone()),
            SlackReactionName(name.to_owned()),
            SlackTs(message.ts.clone()),
        );
        self.http_session()
            .reactions_add(&request)
            .await
            .map_err(|err| AppError::Slack(format!("failed to add reaction: {err}")))?;
        Ok(())
    }

    async fn remove_reaction_from(&self, message: &MessageRef, name: &str) -> Result<()> {
        let request = SlackApiReactionsRemoveRequest::new(SlackReactionName(name.to_owned()))
            .with_channel(SlackChannelId(message.channel.clone()))
            .with_timestamp(SlackTs(message.ts.clone()));
        self.http_session()
            .reactions_remove(&request)
            .await
            .map_err(|err| AppError::Slack(format!("failed to remove reaction: {err}")))?;
        Ok(())
    }

    /// Upload a file using the external upload flow.
    async fn upload_file(
        &self,
        destination: &Destination,
        filename: &str,
        content: &str,
    ) -> Result<String> {
        let session = self.http_session();

        // Step 1: Get upload URL.
        let url_request =
            SlackApiFilesGetUploadUrlExternalRequest::new(filename.into(), content.len());
        let url_response = session
            .get_upload_url_external(&url_request)
            .await
            .map_err(|err| AppError::Slack(format!("failed to get upload url: {err}")))?;

        // Step 2: Upload content to the URL.
        self.http
            .post(url_response.upload_url.0.to_string())
            .body(content.to_owned())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| AppError::Slack(format!("failed to upload file: {err}")))?;

        // Step 3: Complete the upload.
        let file_ref = SlackApiFilesComplete {
            id: url_response.file_id,
            title: Some(filename.into()),
        };
        let mut complete_request = SlackApiFilesCompleteUploadExternalRequest::new(vec![file_ref]);
        complete_request.channel_id = Some(SlackChannelId(destination.channel.clone()));
        complete_request.thread_ts = destination.thread_ts.clone().map(SlackTs);
        let response = session
            .files_complete_upload_external(&complete_request)
            .await
            .map_err(|err| AppError::Slack(format!("failed to complete upload: {err}")))?;

        let permalink = response
            .files
            .first()
            .and_then(|file| file.permalink.as_ref())
            .map(ToString::to_string)
            .unwrap_or_default();
        info!(filename, "uploaded file");
        Ok(permalink)
    }

    async fn create_named_channel(&self, name: &str) -> Result<String> {
        let channel_name = channel_name(name);
        if channel_name.is_empty() {
            return Err(AppError::Slack(format!("invalid channel name: {name:?}")));
        }
        let request = SlackApiConversationsCreateRequest::new(channel_name.clone());
        let response = self
            .http_session()
            .conversations_create(&request)
            .await
            .map_err(|err| {
                AppError::Slack(format!("failed to create channel {channel_name}: {err}"))
            })?;
        info!(channel = ?response.channel.id, name = channel_name, "channel created");
        Ok(response.channel.id.0)
    }

    async fn archive(&self, channel: &str) -> Result<()> {
        let request = SlackApiConversationsArchiveRequest::new(SlackChannelId(channel.to_owned()));
        self.http_session()
            .conversations_archive(&request)
            .await
            .map_err(|err| AppError::Slack(format!("failed to archive channel: {err}")))?;
        info!(channel, "channel archived");
        Ok(())
    }
}

impl ChatTransport for SlackService {
    fn post<'a>(
        &'a self,
        destination: &'a Destination,
        body: &'a MessageBody,
    ) -> TransportFuture<'a, MessageRef> {
        Box::pin(self.post_message(destination, body))
    }

    fn update<'a>(
        &'a self,
        message: &'a MessageRef,
        body: &'a MessageBody,
    ) -> TransportFuture<'a, ()> {
        Box::pin(self.update_message(message, body))
    }

    fn delete<'a>(&'a self, message: &'a MessageRef) -> TransportFuture<'a, ()> {
        Box::pin(self.delete_message(message))
    }

    fn add_reaction<'a>(
        &'a self,
        message: &'a MessageRef,
        name: &'a str,
    ) -> TransportFuture<'a, ()> {
        Box::pin(self.add_reaction_to(message, name))
    }

    fn remove_reaction<'a>(
        &'a self,
        message: &'a MessageRef,
        name: &'a str,
    ) -> TransportFuture<'a, ()> {
        Box::pin(self.remove_reaction_from(message, name))
    }

    fn upload<'a>(
        &'a self,
        destination: &'a Destination,
        filename: &'a str,
        content: &'a str,
    ) -> TransportFuture<'a, String> {
        Box::pin(self.upload_file(destination, filename, content))
    }

    fn create_channel<'a>(&'a self, name: &'a str) -> TransportFuture<'a, String> {
        Box::pin(self.create_named_channel(name))
    }

    fn archive_channel<'a>(&'a self, channel: &'a str) -> TransportFuture<'a, ()> {
        Box::pin(self.archive(channel))
    }
}

/// Normalize a user-supplied name into a valid Slack channel name.
#[must_use]
pub fn channel_name(name: &str) -> String {
    let mut out = String::new();
    for ch in name.trim().to_lowercase().chars() {
        let mapped = match ch {
            'a'..='z' | '0'..='9' | '_' | '-' => ch,
            _ => '-',
        };
        if mapped == '-' && out.ends_with('-') {
            continue;
        }
        out.push(mapped);
    }
    out.trim_matches('-').chars().take(MAX_CHANNEL_NAME).collect()
}

fn message_content(body: &MessageBody) -> SlackMessageContent {
    let text = markdown_to_mrkdwn(&body.text);
    let blocks: Option<Vec<SlackBlock>> = body
        .cancel_key
        .as_deref()
        .map(|key| blocks::cancellable(&text, key));
    SlackMessageContent {
        text: Some(text),
        blocks,
        attachments: None,
        upload: None,
        files: None,
        reactions: None,
        metadata: None,
        markdown_text: None,
    }
}

fn is_rate_limited(error: &slack_morphism::errors::SlackClientError) -> bool {
    matches!(error, slack_morphism::errors::SlackClientError::RateLimitError(_))
}

fn retry_delay(error: &slack_morphism::errors::SlackClientError, backoff: Duration) -> Duration {
    match error {
        slack_morphism::errors::SlackClientError::RateLimitError(rate) => {
            rate.retry_after.unwrap_or(backoff)
        }
        _ => backoff,
    }
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | '\0' => '_',
            other => other,
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "attachment".to_owned()
    } else {
        trimmed.to_owned()
    }
}
