//! Task model: one prompt travelling through the relay pipeline.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where replies for a task are posted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Destination {
    /// Slack channel ID.
    pub channel: String,
    /// Thread to reply into; `None` posts at channel level.
    pub thread_ts: Option<String>,
}

impl Destination {
    /// Reply into the thread rooted at `thread_ts`.
    #[must_use]
    pub fn thread(channel: impl Into<String>, thread_ts: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            thread_ts: Some(thread_ts.into()),
        }
    }

    /// Post at channel level.
    #[must_use]
    pub fn channel(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            thread_ts: None,
        }
    }
}

/// Reference to a message already posted by the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub struct MessageRef {
    /// Channel the message lives in.
    pub channel: String,
    /// Slack timestamp identifying the message.
    pub ts: String,
}

impl MessageRef {
    /// Build a reference from channel and timestamp.
    #[must_use]
    pub fn new(channel: impl Into<String>, ts: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ts: ts.into(),
        }
    }
}

/// Outbound message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBody {
    /// Markdown text.
    pub text: String,
    /// When set, the message carries a Cancel button for this conversation.
    pub cancel_key: Option<String>,
}

impl MessageBody {
    /// Plain text body without controls.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cancel_key: None,
        }
    }

    /// Attach a Cancel button targeting `conversation_key`.
    #[must_use]
    pub fn with_cancel(mut self, conversation_key: impl Into<String>) -> Self {
        self.cancel_key = Some(conversation_key.into());
        self
    }
}

/// A prompt waiting for, or undergoing, execution.
///
/// Immutable once created; owned by whichever queue or executor holds it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Task {
    /// Unique task identifier.
    pub id: String,
    /// Conversation key (one per chat channel).
    pub conversation: String,
    /// Prompt text as typed by the user.
    pub prompt: String,
    /// Where replies are posted.
    pub destination: Destination,
    /// Inbound message that triggered the task (reaction target).
    pub source: Option<MessageRef>,
    /// Working directory for the worker process.
    pub workdir: PathBuf,
    /// Local paths of files attached to the inbound message.
    pub files: Vec<PathBuf>,
    /// When the task was created.
    pub enqueued_at: DateTime<Utc>,
}

impl Task {
    /// Create a new task with a generated ID.
    #[must_use]
    pub fn new(
        conversation: impl Into<String>,
        prompt: impl Into<String>,
        destination: Destination,
        workdir: PathBuf,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation: conversation.into(),
            prompt: prompt.into(),
            destination,
            source: None,
            workdir,
            files: Vec::new(),
            enqueued_at: Utc::now(),
        }
    }

    /// Attach the triggering message.
    #[must_use]
    pub fn with_source(mut self, source: MessageRef) -> Self {
        self.source = Some(source);
        self
    }

    /// Attach downloaded file references.
    #[must_use]
    pub fn with_files(mut self, files: Vec<PathBuf>) -> Self {
        self.files = files;
        self
    }

    /// Prompt handed to the worker: the user text followed by attached paths.
    #[must_use]
    pub fn effective_prompt(&self) -> String {
        if self.files.is_empty() {
            return self.prompt.clone();
        }
        let mut prompt = self.prompt.clone();
        prompt.push_str("\n\nAttached files:");
        for file in &self.files {
            prompt.push_str("\n- ");
            prompt.push_str(&file.display().to_string());
        }
        prompt
    }
}
