//! Worker stream decoder.
//!
//! Parses each NDJSON line printed by the worker into zero or more
//! [`StreamEvent`]s. Unknown line types, unknown content blocks, and
//! malformed JSON are skipped rather than surfaced.
//!
//! # Known line shapes
//!
//! | `type`      | Maps to                                               |
//! |-------------|-------------------------------------------------------|
//! | `system`    | [`StreamEvent::Init`] (subtype `init` only)           |
//! | `assistant` | [`StreamEvent::Text`] / `Thinking` / `ToolStart` per block |
//! | `user`      | [`StreamEvent::ToolResult`] per `tool_result` block   |
//! | `result`    | [`StreamEvent::Final`]                                |
//! | *(other)*   | Skipped; logged at `DEBUG`                            |

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::models::event::{FinalEvent, StreamEvent, Usage};

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireLine {
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        cwd: Option<String>,
    },
    Assistant {
        message: WireMessage,
    },
    User {
        message: WireMessage,
    },
    Result(WireResult),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    /// Either a block array or a bare string; only arrays carry events.
    #[serde(default)]
    content: Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireResult {
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    usage: Usage,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    num_turns: u32,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decode one line of worker output.
///
/// Returns an empty vector for blank lines, malformed JSON, and shapes the
/// relay does not know. A single `assistant` line may contain several
/// content blocks and therefore yield several events, in block order.
#[must_use]
pub fn decode_line(line: &str) -> Vec<StreamEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let wire: WireLine = match serde_json::from_str(trimmed) {
        Ok(wire) => wire,
        Err(err) => {
            debug!(error = %err, "worker decoder: skipping undecodable line");
            return Vec::new();
        }
    };

    match wire {
        WireLine::System {
            subtype,
            session_id,
            model,
            cwd,
        } => {
            if subtype.as_deref() == Some("init") {
                vec![StreamEvent::Init {
                    model,
                    cwd,
                    token: session_id,
                }]
            } else {
                Vec::new()
            }
        }
        WireLine::Assistant { message } | WireLine::User { message } => {
            blocks(message.content).filter_map(block_event).collect()
        }
        WireLine::Result(result) => vec![StreamEvent::Final(final_event(result))],
        WireLine::Unknown => {
            debug!("worker decoder: skipping unknown line type");
            Vec::new()
        }
    }
}

/// Flatten tool-result content (string, or array of typed blocks) into text.
#[must_use]
pub fn flatten_tool_content(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item.get("text").and_then(Value::as_str) {
                Some(text) => text.to_owned(),
                None => match item.get("type").and_then(Value::as_str) {
                    Some(kind) => format!("[{kind}]"),
                    None => item.to_string(),
                },
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn blocks(content: Value) -> impl Iterator<Item = WireBlock> {
    let items = match content {
        Value::Array(items) => items,
        _ => Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<WireBlock>(item).ok())
}

fn block_event(block: WireBlock) -> Option<StreamEvent> {
    match block {
        WireBlock::Text { text } if !text.is_empty() => Some(StreamEvent::Text { fragment: text }),
        WireBlock::Thinking { thinking } if !thinking.is_empty() => {
            Some(StreamEvent::Thinking { fragment: thinking })
        }
        WireBlock::ToolUse { id, name, input } => Some(StreamEvent::ToolStart { name, id, input }),
        WireBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => Some(StreamEvent::ToolResult {
            id: tool_use_id,
            output: flatten_tool_content(&content),
            is_error,
        }),
        _ => None,
    }
}

fn final_event(result: WireResult) -> FinalEvent {
    let error_message = result.error.or_else(|| {
        // Error subtypes such as `error_max_turns` carry no message of their own.
        match result.subtype.as_deref() {
            Some(subtype) if result.is_error && subtype != "success" => Some(subtype.to_owned()),
            _ => None,
        }
    });

    FinalEvent {
        result_text: result.result.unwrap_or_default(),
        token: result.session_id,
        is_error: result.is_error,
        error_message,
        usage: result.usage,
        duration_ms: result.duration_ms,
        turns: result.num_turns,
    }
}
