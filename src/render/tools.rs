//! Tool call classification and one-line summaries.

use serde_json::Value;

use crate::render::format::truncate_chars;

/// Longest tool summary shown in a batch line.
const SUMMARY_CHARS: usize = 120;

/// Input fields consulted, in order, to summarise a tool call.
const SUMMARY_FIELDS: &[&str] = &[
    "file_path",
    "notebook_path",
    "path",
    "pattern",
    "command",
    "url",
    "query",
    "description",
    "prompt",
];

/// Batching category of a tool.
///
/// Consecutive calls of the same category are coalesced into one message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ToolCategory {
    /// Tools that inspect files.
    Read,
    /// Tools that modify files.
    Write,
    /// Tools that reach the network.
    Web,
    /// Any other tool, batched only with itself.
    Other(String),
}

impl ToolCategory {
    /// Classify a tool by name.
    #[must_use]
    pub fn of(name: &str) -> Self {
        match name {
            "Read" | "Glob" | "Grep" | "LS" | "NotebookRead" => Self::Read,
            "Write" | "Edit" | "MultiEdit" | "NotebookEdit" => Self::Write,
            "WebFetch" | "WebSearch" => Self::Web,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Emoji prefix for batch lines.
    #[must_use]
    pub fn icon(&self) -> &'static str {
        match self {
            Self::Read => ":mag:",
            Self::Write => ":pencil2:",
            Self::Web => ":globe_with_meridians:",
            Self::Other(name) if name == "Bash" => ":computer:",
            Self::Other(name) if name == "Task" => ":busts_in_silhouette:",
            Self::Other(name) if name == "TodoWrite" => ":clipboard:",
            Self::Other(_) => ":wrench:",
        }
    }
}

/// One-line description of a tool call: name plus its most telling input.
#[must_use]
pub fn summarize(name: &str, input: &Value) -> String {
    let detail = SUMMARY_FIELDS.iter().find_map(|field| {
        input
            .get(*field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    });

    match detail {
        Some(detail) => {
            let first_line = detail.lines().next().unwrap_or_default();
            let mut shown = truncate_chars(first_line, SUMMARY_CHARS);
            if first_line.len() < detail.len() && !shown.ends_with('…') {
                shown.push('…');
            }
            format!("`{name}` {shown}")
        }
        None => format!("`{name}`"),
    }
}

/// Render a coalesced batch of tool calls as one message.
#[must_use]
pub fn format_batch(category: &ToolCategory, entries: &[String]) -> String {
    let icon = category.icon();
    entries
        .iter()
        .map(|entry| format!("{icon} {entry}"))
        .collect::<Vec<_>>()
        .join("\n")
}
