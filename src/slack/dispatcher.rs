//! Per-channel ordering of inbound messages.
//!
//! Every channel gets one consumer task fed by an unbounded queue. Messages
//! of one channel are handled one at a time in arrival order, so a prompt
//! whose attachments are still downloading is submitted before any later
//! message of that channel. Channels proceed independently.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::app::AppState;
use crate::slack::commands::{self, InboundMessage};

/// Routes inbound messages to their channel's consumer task.
#[derive(Debug, Default)]
pub struct ChannelDispatcher {
    queues: Mutex<HashMap<String, UnboundedSender<InboundMessage>>>,
}

impl ChannelDispatcher {
    /// Queue `message` behind earlier messages of the same channel.
    ///
    /// Starts the channel's consumer on first use. Consumers hold only a weak
    /// reference to `app` and stop once it is dropped.
    pub async fn enqueue(&self, app: &Arc<AppState>, message: InboundMessage) {
        let mut queues = self.queues.lock().await;

        let message = match queues.get(&message.channel) {
            Some(tx) => match tx.send(message) {
                Ok(()) => return,
                // Consumer gone; start a fresh one below.
                Err(mpsc::error::SendError(message)) => message,
            },
            None => message,
        };

        let channel = message.channel.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(message).is_err() {
            warn!(%channel, "channel queue closed before first message");
            return;
        }
        queues.insert(channel.clone(), tx);
        tokio::spawn(consume(Arc::downgrade(app), channel, rx));
    }
}

async fn consume(app: Weak<AppState>, channel: String, mut rx: UnboundedReceiver<InboundMessage>) {
    debug!(%channel, "channel consumer started");
    while let Some(message) = rx.recv().await {
        let Some(app) = app.upgrade() else {
            break;
        };
        commands::dispatch(&app, message).await;
    }
    debug!(%channel, "channel consumer stopped");
}
