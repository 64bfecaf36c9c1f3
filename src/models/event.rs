//! Events decoded from the worker's structured output stream.

use serde::{Deserialize, Serialize};

/// Token accounting reported by the worker at the end of a run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Usage {
    /// Fresh input tokens.
    #[serde(default)]
    pub input_tokens: u64,
    /// Generated output tokens.
    #[serde(default)]
    pub output_tokens: u64,
    /// Input tokens written to the prompt cache.
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    /// Input tokens served from the prompt cache.
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

impl Usage {
    /// Total tokens counted against the context window.
    #[must_use]
    pub fn combined(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_creation_input_tokens)
            .saturating_add(self.cache_read_input_tokens)
    }
}

/// Terminal event of a well-formed worker stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalEvent {
    /// Final answer text, possibly empty when the worker streamed it already.
    pub result_text: String,
    /// Continuation token to resume this conversation.
    pub token: Option<String>,
    /// Whether the worker reported the run as failed.
    pub is_error: bool,
    /// Worker-provided error description, if any.
    pub error_message: Option<String>,
    /// Token accounting.
    pub usage: Usage,
    /// Wall-clock duration reported by the worker.
    pub duration_ms: u64,
    /// Number of agent turns.
    pub turns: u32,
}

impl FinalEvent {
    /// Text describing the failure: the explicit error, else the result text.
    #[must_use]
    pub fn failure_text(&self) -> &str {
        self.error_message
            .as_deref()
            .filter(|msg| !msg.is_empty())
            .unwrap_or(&self.result_text)
    }
}

/// One decoded event from the worker stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Session metadata; first event of a run.
    Init {
        /// Model serving the session.
        model: Option<String>,
        /// Working directory reported by the worker.
        cwd: Option<String>,
        /// Continuation token for the session.
        token: Option<String>,
    },
    /// Prose fragment.
    Text {
        /// Fragment text.
        fragment: String,
    },
    /// Reasoning fragment.
    Thinking {
        /// Fragment text.
        fragment: String,
    },
    /// The worker invoked a tool.
    ToolStart {
        /// Tool name, e.g. `Read`.
        name: String,
        /// Tool call identifier, echoed by the matching result.
        id: String,
        /// Raw tool input.
        input: serde_json::Value,
    },
    /// A tool call finished.
    ToolResult {
        /// Identifier of the matching [`StreamEvent::ToolStart`].
        id: String,
        /// Tool output flattened to text.
        output: String,
        /// Whether the tool failed.
        is_error: bool,
    },
    /// End of the run.
    Final(FinalEvent),
}

impl StreamEvent {
    /// Continuation token carried by this event, if any.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Init { token, .. } => token.as_deref(),
            Self::Final(event) => event.token.as_deref(),
            _ => None,
        }
        .filter(|token| !token.is_empty())
    }
}
