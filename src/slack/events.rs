//! Slack Socket Mode event handlers.
//!
//! Inbound channel messages become commands or prompt tasks; the Cancel
//! button on heartbeat messages cancels the conversation's running task.
//!
//! ## Authorization
//!
//! Every message and block action is checked against
//! `authorized_user_ids`. Unauthorized attempts are silently ignored from
//! the Slack user's perspective but logged as security events.
//!
//! Handlers return quickly so Socket Mode can acknowledge the envelope;
//! messages are handed to the per-channel dispatcher, which runs them in
//! arrival order on background tasks.

use std::sync::Arc;

use slack_morphism::prelude::{
    SlackClient, SlackClientEventsUserState, SlackClientHyperHttpsConnector,
    SlackEventCallbackBody, SlackInteractionEvent, SlackMessageEvent, SlackMessageEventType,
    SlackPushEventCallback,
};
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::slack::blocks::CANCEL_ACTION_ID;
use crate::slack::commands::{InboundFile, InboundMessage};

/// Verify that the acting Slack user is in the relay's `authorized_user_ids`.
///
/// On failure, logs a security event and returns `false`; the caller drops
/// the event without replying.
fn is_authorized(user_id: &str, state: &AppState) -> bool {
    if state.config.ensure_authorized(user_id).is_ok() {
        return true;
    }

    warn!(
        user_id,
        "unauthorized user attempted to use the relay (silently ignored)"
    );
    false
}

async fn app_state(state: &SlackClientEventsUserState) -> Option<Arc<AppState>> {
    let guard = state.read().await;
    guard.get_user_state::<Arc<AppState>>().cloned()
}

/// Handle push events (channel messages) delivered via Socket Mode.
///
/// # Errors
///
/// Never fails; problems are logged.
pub async fn handle_push_event(
    event: SlackPushEventCallback,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::UserCallbackResult<()> {
    let SlackEventCallbackBody::Message(message) = event.event else {
        debug!("ignoring non-message push event");
        return Ok(());
    };

    let Some(app) = app_state(&state).await else {
        warn!("app state not available; cannot process message");
        return Ok(());
    };

    let Some(inbound) = inbound_message(message) else {
        return Ok(());
    };

    if !is_authorized(&inbound.user, &app) {
        return Ok(());
    }

    info!(
        channel = %inbound.channel,
        user = %inbound.user,
        files = inbound.files.len(),
        "inbound message"
    );
    app.dispatcher.enqueue(&app, inbound).await;
    Ok(())
}

/// Handle interactive payloads (the Cancel button) delivered via Socket Mode.
///
/// # Errors
///
/// Never fails; problems are logged.
pub async fn handle_interaction(
    event: SlackInteractionEvent,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::UserCallbackResult<()> {
    let SlackInteractionEvent::BlockActions(block_event) = &event else {
        debug!("unhandled interaction event type");
        return Ok(());
    };

    let user_id = block_event
        .user
        .as_ref()
        .map(|u| u.id.to_string())
        .unwrap_or_default();
    if user_id.is_empty() {
        warn!("block action with empty user ID; ignoring");
        return Ok(());
    }

    let Some(app) = app_state(&state).await else {
        warn!("app state not available; cannot process interaction");
        return Ok(());
    };

    if !is_authorized(&user_id, &app) {
        return Ok(());
    }

    for action in block_event.actions.iter().flatten() {
        let action_id = action.action_id.to_string();
        if action_id != CANCEL_ACTION_ID {
            warn!(action_id, "unknown action_id");
            continue;
        }
        let Some(conversation) = action.value.as_deref() else {
            warn!("cancel action without conversation key");
            continue;
        };
        let cancelled = app.executor.scheduler().cancel(conversation).await;
        info!(conversation, user_id, cancelled, "cancel button pressed");
    }
    Ok(())
}

/// Extract a user message, skipping bot posts, edits, and other subtypes.
fn inbound_message(message: SlackMessageEvent) -> Option<InboundMessage> {
    if message.sender.bot_id.is_some() {
        return None;
    }
    match &message.subtype {
        None | Some(SlackMessageEventType::FileShare) => {}
        Some(other) => {
            debug!(subtype = ?other, "ignoring message subtype");
            return None;
        }
    }

    let user = message.sender.user?.to_string();
    let channel = message.origin.channel?.to_string();
    let (text, files) = match message.content {
        Some(content) => (
            content.text.unwrap_or_default(),
            content.files.unwrap_or_default(),
        ),
        None => (String::new(), Vec::new()),
    };
    let text = text.trim().to_owned();
    let files: Vec<InboundFile> = files
        .into_iter()
        .filter_map(|file| {
            let url = file.url_private_download.or(file.url_private)?;
            Some(InboundFile {
                name: file.name.unwrap_or_else(|| file.id.to_string()),
                url: url.to_string(),
            })
        })
        .collect();

    if text.is_empty() && files.is_empty() {
        return None;
    }

    Some(InboundMessage {
        channel,
        ts: message.origin.ts.to_string(),
        thread_ts: message.origin.thread_ts.map(|ts| ts.to_string()),
        user,
        text,
        files,
    })
}
