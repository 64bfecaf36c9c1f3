//! Text formatting helpers for chat output.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::RenderConfig;
use crate::models::event::FinalEvent;

/// Preferred maximum length of a single chat message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 3500;

static BOLD: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").ok());

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Prefers breaking after a newline, then after a space, as long as the
/// break point lies in the second half of the chunk. The break character
/// stays at the end of its chunk, so the chunks concatenate back to `text`.
#[must_use]
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut remaining = text;

    while remaining.chars().count() > max_chars {
        let limit = remaining
            .char_indices()
            .nth(max_chars)
            .map_or(remaining.len(), |(idx, _)| idx);
        let window = &remaining[..limit];
        let half = limit / 2;

        let split_at = match window.rfind('\n') {
            Some(idx) if idx > half => idx + 1,
            _ => match window.rfind(' ') {
                Some(idx) if idx > half => idx + 1,
                _ => limit,
            },
        };

        chunks.push(remaining[..split_at].to_owned());
        remaining = &remaining[split_at..];
    }

    if !remaining.is_empty() || chunks.is_empty() {
        chunks.push(remaining.to_owned());
    }
    chunks
}

/// Cut `text` to at most `max_chars` characters, marking the cut with `…`.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_owned(),
        Some((idx, _)) => {
            let mut cut = text[..idx].to_owned();
            cut.push('…');
            cut
        }
    }
}

/// Convert GitHub-flavoured markdown to Slack `mrkdwn`.
///
/// Headers become bold lines, `**bold**` becomes `*bold*`, table rows
/// become `key: value` lines. Fenced code blocks pass through untouched.
#[must_use]
pub fn markdown_to_mrkdwn(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut in_code = false;

    for line in text.split('\n') {
        if line.trim_start().starts_with("```") {
            in_code = !in_code;
            out.push(line.to_owned());
            continue;
        }
        if in_code {
            out.push(line.to_owned());
            continue;
        }

        let trimmed = line.trim();

        if trimmed.starts_with('#') {
            let header = trimmed.trim_start_matches('#').trim();
            if !header.is_empty() {
                out.push(format!("*{}*", strip_bold(header)));
                continue;
            }
        }

        if trimmed.len() > 1 && trimmed.starts_with('|') && trimmed.ends_with('|') {
            if trimmed.contains("---") {
                continue;
            }
            let cells: Vec<&str> = trimmed
                .split('|')
                .map(str::trim)
                .filter(|cell| !cell.is_empty())
                .collect();
            match cells.as_slice() {
                [] => {}
                [only] => out.push(strip_bold(only)),
                [key, rest @ ..] => {
                    out.push(format!("*{}*: {}", strip_bold(key), rest.join(" | ")));
                }
            }
            continue;
        }

        out.push(convert_bold(line));
    }

    out.join("\n")
}

/// Human-readable duration, e.g. `850ms`, `12.3s`, `2m 05s`.
#[must_use]
pub fn format_duration_ms(ms: u64) -> String {
    if ms < 1000 {
        return format!("{ms}ms");
    }
    let secs = ms / 1000;
    if secs < 60 {
        return format!("{secs}.{}s", (ms % 1000) / 100);
    }
    format!("{}m {:02}s", secs / 60, secs % 60)
}

/// Thousands-separated integer, e.g. `12,345`.
#[must_use]
pub fn format_count(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Closing statistics line for a finished run, with context-size notes.
#[must_use]
pub fn format_stats(event: &FinalEvent, config: &RenderConfig) -> String {
    let usage = &event.usage;
    let input = usage
        .input_tokens
        .saturating_add(usage.cache_creation_input_tokens)
        .saturating_add(usage.cache_read_input_tokens);
    let mut stats = format!(
        "_turns: {} | tokens: {} in / {} out | {}_",
        event.turns,
        format_count(input),
        format_count(usage.output_tokens),
        format_duration_ms(event.duration_ms),
    );

    let combined = usage.combined();
    if combined > config.hard_token_watermark {
        let _ = write!(
            stats,
            "\n:warning: *Context is very large ({} tokens).* Consider `!reset` or `!fork` to start fresh.",
            format_count(combined)
        );
    } else if combined > config.soft_token_watermark {
        let _ = write!(
            stats,
            "\n_note: context is growing ({} tokens)._",
            format_count(combined)
        );
    }

    stats
}

fn convert_bold(line: &str) -> String {
    match BOLD.as_ref() {
        Some(re) => re.replace_all(line, "*$1*").into_owned(),
        None => line.to_owned(),
    }
}

fn strip_bold(text: &str) -> String {
    text.replace("**", "")
}
