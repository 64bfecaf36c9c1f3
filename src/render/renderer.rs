//! Incremental renderer: worker events in, bounded chat operations out.
//!
//! One [`IncrementalRenderer`] exists per worker invocation and is owned by
//! the executor driving that invocation, so its state needs no locking.
//!
//! # Output rules
//!
//! - **Text** accumulates into the current prose segment. The segment is
//!   flushed (post, or update of the segment's message) on its first
//!   fragment, when the flush interval passed since the last flush, or when
//!   enough unflushed characters piled up and the minimum spacing passed.
//!   Non-final flushes carry a "still composing" marker.
//! - **Tool calls** end the current prose segment. Consecutive calls of the
//!   same [`ToolCategory`] within the batch window are coalesced into one
//!   message; new prose closes the batch.
//! - **Tool results** are always shown: failures as an error block, short
//!   output inline. Long results are previewed inline and uploaded in full in
//!   the background.
//! - **Thinking** is shown only in verbose mode.
//! - **Heartbeat**: after an idle period a single "still working" message
//!   with a Cancel button appears; any activity deletes it before new
//!   content is posted.
//! - **Final**: pending text and tools are flushed, the result is posted if
//!   no prose was streamed, then one statistics message closes the run.
//!
//! All time-dependent methods take `now` explicitly; the executor passes
//! [`Instant::now`] and tests pass synthetic instants.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RenderConfig;
use crate::models::event::{FinalEvent, StreamEvent};
use crate::models::task::{Destination, MessageBody, MessageRef};
use crate::render::format::{
    format_duration_ms, format_stats, split_message, truncate_chars, MAX_MESSAGE_CHARS,
};
use crate::render::tools::{format_batch, summarize, ToolCategory};
use crate::slack::transport::ChatTransport;
use crate::AppError;

/// Marker appended to prose that is still streaming.
pub const COMPOSING_SUFFIX: &str = "\n\n_…still composing_";

/// Text of the placeholder posted when an invocation starts.
pub const PLACEHOLDER_TEXT: &str = ":hourglass_flowing_sand: _thinking…_";

/// Characters of a long tool result shown inline next to the upload.
const PREVIEW_CHARS: usize = 300;

/// Phrases identifying a context-window overflow in worker errors.
const OVERFLOW_MARKERS: &[&str] = &[
    "prompt is too long",
    "context length",
    "context window",
    "too many tokens",
];

/// How an invocation ended, from the renderer's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// The worker finished normally.
    Completed,
    /// The worker ran out of context; the caller should compact and continue.
    ContextOverflow,
    /// The worker failed; the message was already shown to the user.
    Failed(String),
    /// The run was cancelled or timed out.
    Interrupted(String),
}

/// Whether a worker error or result text reports a context-window overflow.
#[must_use]
pub fn is_context_overflow(text: &str) -> bool {
    let lowered = text.to_lowercase();
    OVERFLOW_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

#[derive(Debug)]
struct ToolBatch {
    category: ToolCategory,
    entries: Vec<String>,
    last_at: Instant,
}

/// Per-invocation rendering state machine.
pub struct IncrementalRenderer {
    transport: Arc<dyn ChatTransport>,
    destination: Destination,
    conversation: String,
    config: RenderConfig,
    verbose: bool,

    started_at: Instant,
    placeholder: Option<MessageRef>,
    init_announced: bool,

    // Current prose segment.
    text: String,
    text_msg: Option<MessageRef>,
    text_dirty: bool,
    unflushed_chars: usize,
    last_flush: Instant,
    prose_posted: bool,

    batch: Option<ToolBatch>,
    tool_names: HashMap<String, String>,

    last_activity: Instant,
    heartbeat_msg: Option<MessageRef>,
    heartbeat_updated: Instant,

    uploads: JoinSet<()>,
    finished: bool,
}

impl IncrementalRenderer {
    /// Create a renderer replying to `destination`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        destination: Destination,
        conversation: impl Into<String>,
        config: RenderConfig,
        verbose: bool,
        now: Instant,
    ) -> Self {
        Self {
            transport,
            destination,
            conversation: conversation.into(),
            config,
            verbose,
            started_at: now,
            placeholder: None,
            init_announced: false,
            text: String::new(),
            text_msg: None,
            text_dirty: false,
            unflushed_chars: 0,
            last_flush: now,
            prose_posted: false,
            batch: None,
            tool_names: HashMap::new(),
            last_activity: now,
            heartbeat_msg: None,
            heartbeat_updated: now,
            uploads: JoinSet::new(),
            finished: false,
        }
    }

    /// Post the "thinking…" placeholder.
    pub async fn start(&mut self) {
        self.placeholder = self.post(MessageBody::text(PLACEHOLDER_TEXT)).await;
    }

    /// Whether a heartbeat message is currently showing.
    #[must_use]
    pub fn heartbeat_visible(&self) -> bool {
        self.heartbeat_msg.is_some()
    }

    /// Earliest instant at which buffered output must be flushed.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        let text = self
            .text_dirty
            .then(|| self.last_flush + self.config.text_flush_interval());
        let batch = self
            .batch
            .as_ref()
            .map(|batch| batch.last_at + self.config.tool_batch_window());
        match (text, batch) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Flush whatever is due at `now`.
    pub async fn flush_due(&mut self, now: Instant) {
        if self.finished {
            return;
        }
        if self.text_dirty
            && now.saturating_duration_since(self.last_flush) >= self.config.text_flush_interval()
        {
            self.flush_text(now, false).await;
        }
        let batch_due = self.batch.as_ref().is_some_and(|batch| {
            now.saturating_duration_since(batch.last_at) >= self.config.tool_batch_window()
        });
        if batch_due {
            self.flush_batch().await;
        }
    }

    /// Heartbeat tick: show or refresh the "still working" indicator.
    pub async fn tick(&mut self, now: Instant) {
        if self.finished {
            return;
        }
        let idle = self.config.heartbeat_idle();
        if now.saturating_duration_since(self.last_activity) < idle {
            return;
        }

        let elapsed = now.saturating_duration_since(self.started_at);
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let body = MessageBody::text(format!(
            ":hourglass_flowing_sand: _still working… ({})_",
            format_duration_ms(elapsed_ms - elapsed_ms % 1000)
        ))
        .with_cancel(self.conversation.clone());

        match self.heartbeat_msg.clone() {
            None => {
                self.heartbeat_msg = self.post(body).await;
                self.heartbeat_updated = now;
                debug!(conversation = %self.conversation, "heartbeat shown");
            }
            Some(message) => {
                if now.saturating_duration_since(self.heartbeat_updated) >= idle {
                    self.update(&message, &body).await;
                    self.heartbeat_updated = now;
                }
            }
        }
    }

    /// Feed one decoded event.
    ///
    /// Returns the outcome once a [`StreamEvent::Final`] has been handled.
    /// The caller must stop the heartbeat ticker before passing the final
    /// event.
    pub async fn handle(&mut self, event: StreamEvent, now: Instant) -> Option<RenderOutcome> {
        if self.finished {
            return None;
        }

        match event {
            StreamEvent::Final(event) => return Some(self.finish(&event, now).await),
            StreamEvent::Init { model, cwd, .. } => {
                self.record_activity(now).await;
                self.announce(model.as_deref(), cwd.as_deref()).await;
            }
            StreamEvent::Text { fragment } => {
                self.record_activity(now).await;
                if !fragment.trim().is_empty() {
                    self.flush_batch().await;
                }
                self.push_text(&fragment, now).await;
            }
            StreamEvent::Thinking { fragment } => {
                self.record_activity(now).await;
                if self.verbose {
                    self.flush_text(now, true).await;
                    self.flush_batch().await;
                    let shown = truncate_chars(fragment.trim(), self.config.inline_result_chars);
                    self.post(MessageBody::text(format!(":thought_balloon: _{shown}_")))
                        .await;
                }
            }
            StreamEvent::ToolStart { name, id, input } => {
                self.record_activity(now).await;
                self.flush_text(now, true).await;
                self.push_tool(&name, &input, now).await;
                self.tool_names.insert(id, name);
            }
            StreamEvent::ToolResult {
                id,
                output,
                is_error,
            } => {
                self.record_activity(now).await;
                self.show_tool_result(&id, &output, is_error, now).await;
            }
        }
        None
    }

    /// Close a run whose worker exited without a final event.
    ///
    /// Streamed text is kept and followed by a warning that it may be
    /// incomplete.
    pub async fn finish_without_final(
        &mut self,
        exit_code: Option<i32>,
        stderr: &str,
        now: Instant,
    ) -> RenderOutcome {
        let reason = match exit_code {
            Some(code) => format!("worker exited with status {code} without a result"),
            None => "worker exited without a result".to_owned(),
        };
        let mut text = format!(":warning: *{reason}.*");
        if self.prose_posted || self.text_dirty {
            text.push_str(" The answer above may be incomplete.");
        }
        if !stderr.is_empty() {
            text.push_str("\n```\n");
            text.push_str(&truncate_chars(stderr, self.config.inline_result_chars));
            text.push_str("\n```");
        }
        self.close_with(&text, now).await;
        RenderOutcome::Failed(reason)
    }

    /// Close a run that was cancelled or timed out.
    pub async fn finish_interrupted(&mut self, error: &AppError, now: Instant) -> RenderOutcome {
        let text = match error {
            AppError::Timeout(msg) => format!(":alarm_clock: *Timed out* ({msg})."),
            AppError::Cancelled(_) => ":no_entry_sign: *Cancelled.*".to_owned(),
            other => format!(":x: *Run aborted:* {other}"),
        };
        self.close_with(&text, now).await;
        RenderOutcome::Interrupted(error.to_string())
    }

    /// Close a run whose worker stream failed.
    pub async fn finish_failed(&mut self, error: &AppError, now: Instant) -> RenderOutcome {
        self.close_with(&format!(":x: *Worker failed:* {error}"), now)
            .await;
        RenderOutcome::Failed(error.to_string())
    }

    // ── Event handling ───────────────────────────────────────────────────────

    async fn announce(&mut self, model: Option<&str>, cwd: Option<&str>) {
        if self.init_announced {
            return;
        }
        self.init_announced = true;

        let mut text = String::from(":robot_face: _session started");
        if let Some(model) = model.filter(|m| !m.is_empty()) {
            let _ = write!(text, " | model `{model}`");
        }
        if let Some(cwd) = cwd.filter(|c| !c.is_empty()) {
            let _ = write!(text, " | `{cwd}`");
        }
        text.push('_');

        let body = MessageBody::text(text);
        match self.placeholder.take() {
            Some(placeholder) => self.update(&placeholder, &body).await,
            None => {
                self.post(body).await;
            }
        }
    }

    async fn push_text(&mut self, fragment: &str, now: Instant) {
        self.text.push_str(fragment);
        self.text_dirty = true;
        self.unflushed_chars += fragment.chars().count();

        let since = now.saturating_duration_since(self.last_flush);
        let first = self.text_msg.is_none();
        let due = first
            || since >= self.config.text_flush_interval()
            || (self.unflushed_chars >= self.config.text_flush_chars
                && since >= self.config.text_flush_min_interval());
        if due {
            self.flush_text(now, false).await;
        }
    }

    async fn push_tool(&mut self, name: &str, input: &serde_json::Value, now: Instant) {
        let category = ToolCategory::of(name);
        let window = self.config.tool_batch_window();
        let stale = self.batch.as_ref().is_some_and(|batch| {
            batch.category != category || now.saturating_duration_since(batch.last_at) >= window
        });
        if stale {
            self.flush_batch().await;
        }

        let entry = summarize(name, input);
        match self.batch.as_mut() {
            Some(batch) => {
                batch.entries.push(entry);
                batch.last_at = now;
            }
            None => {
                self.batch = Some(ToolBatch {
                    category,
                    entries: vec![entry],
                    last_at: now,
                });
            }
        }
    }

    async fn show_tool_result(&mut self, id: &str, output: &str, is_error: bool, now: Instant) {
        self.flush_text(now, true).await;
        self.flush_batch().await;

        let name = self
            .tool_names
            .get(id)
            .cloned()
            .unwrap_or_else(|| "tool".to_owned());
        let cap = self.config.inline_result_chars;
        let trimmed = output.trim();

        if is_error {
            let text = format!(
                ":x: `{name}` failed:\n```\n{}\n```",
                truncate_chars(trimmed, cap)
            );
            self.post(MessageBody::text(text)).await;
            return;
        }

        if trimmed.is_empty() {
            self.post(MessageBody::text(format!(":white_check_mark: `{name}` (no output)")))
                .await;
            return;
        }

        let length = trimmed.chars().count();
        if length <= cap {
            let text = format!(":white_check_mark: `{name}` result:\n```\n{trimmed}\n```");
            self.post(MessageBody::text(text)).await;
            return;
        }

        let text = format!(
            ":page_facing_up: `{name}` result ({length} chars, full output attached):\n```\n{}\n```",
            truncate_chars(trimmed, PREVIEW_CHARS)
        );
        self.post(MessageBody::text(text)).await;

        let transport = Arc::clone(&self.transport);
        let destination = self.destination.clone();
        let filename = format!("{}-{}.txt", name.to_lowercase(), short_id(id));
        let content = trimmed.to_owned();
        self.uploads.spawn(async move {
            match transport.upload(&destination, &filename, &content).await {
                Ok(permalink) => debug!(%permalink, "tool result uploaded"),
                Err(err) => warn!(%err, "tool result upload failed"),
            }
        });
    }

    async fn finish(&mut self, event: &FinalEvent, now: Instant) -> RenderOutcome {
        self.finished = true;
        self.clear_heartbeat().await;

        let failure = event.is_error.then(|| event.failure_text().to_owned());
        if let Some(message) = failure.as_deref() {
            if is_context_overflow(message) {
                self.flush_text(now, true).await;
                self.flush_batch().await;
                self.drain_uploads().await;
                self.discard_placeholder().await;
                self.post(MessageBody::text(
                    ":recycle: _Context window is full, auto-recovering: compacting the conversation and continuing…_",
                ))
                .await;
                info!(conversation = %self.conversation, "context overflow detected");
                return RenderOutcome::ContextOverflow;
            }
        }

        self.flush_text(now, true).await;
        self.flush_batch().await;
        self.discard_placeholder().await;

        let outcome = match failure {
            Some(message) => {
                let shown = if message.is_empty() {
                    "unknown error".to_owned()
                } else {
                    truncate_chars(&message, MAX_MESSAGE_CHARS)
                };
                self.post(MessageBody::text(format!(":x: *Worker error:* {shown}")))
                    .await;
                RenderOutcome::Failed(shown)
            }
            None => {
                if !self.prose_posted {
                    let result = event.result_text.trim();
                    if result.is_empty() {
                        self.post(MessageBody::text("_(no response)_")).await;
                    } else {
                        for chunk in split_message(result, MAX_MESSAGE_CHARS) {
                            self.post(MessageBody::text(chunk)).await;
                        }
                        self.prose_posted = true;
                    }
                }
                RenderOutcome::Completed
            }
        };

        self.drain_uploads().await;
        self.post(MessageBody::text(format_stats(event, &self.config)))
            .await;
        outcome
    }

    async fn close_with(&mut self, text: &str, now: Instant) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.clear_heartbeat().await;
        self.flush_text(now, true).await;
        self.flush_batch().await;
        self.drain_uploads().await;
        self.discard_placeholder().await;
        self.post(MessageBody::text(text)).await;
    }

    // ── Flushing ─────────────────────────────────────────────────────────────

    async fn record_activity(&mut self, now: Instant) {
        self.last_activity = now;
        self.clear_heartbeat().await;
    }

    async fn flush_text(&mut self, now: Instant, final_segment: bool) {
        if self.text.is_empty() {
            return;
        }
        if !final_segment && !self.text_dirty {
            return;
        }

        let mut chunks = split_message(&self.text, MAX_MESSAGE_CHARS);
        let tail = chunks.pop().unwrap_or_default();
        for chunk in chunks {
            self.write_segment(MessageBody::text(chunk)).await;
            self.text_msg = None;
        }

        if final_segment {
            self.write_segment(MessageBody::text(tail)).await;
            self.text_msg = None;
            self.text.clear();
        } else {
            let body = MessageBody::text(format!("{tail}{COMPOSING_SUFFIX}"));
            self.text = tail;
            self.write_segment(body).await;
        }

        self.text_dirty = false;
        self.unflushed_chars = 0;
        self.last_flush = now;
        self.prose_posted = true;
    }

    async fn write_segment(&mut self, body: MessageBody) {
        if let Some(message) = self.text_msg.clone() {
            self.update(&message, &body).await;
            return;
        }
        if let Some(placeholder) = self.placeholder.take() {
            self.update(&placeholder, &body).await;
            self.text_msg = Some(placeholder);
            return;
        }
        self.text_msg = self.post(body).await;
    }

    async fn flush_batch(&mut self) {
        if let Some(batch) = self.batch.take() {
            let text = format_batch(&batch.category, &batch.entries);
            self.post(MessageBody::text(text)).await;
        }
    }

    async fn clear_heartbeat(&mut self) {
        if let Some(message) = self.heartbeat_msg.take() {
            self.delete(&message).await;
            debug!(conversation = %self.conversation, "heartbeat removed");
        }
    }

    async fn discard_placeholder(&mut self) {
        if let Some(placeholder) = self.placeholder.take() {
            self.delete(&placeholder).await;
        }
    }

    async fn drain_uploads(&mut self) {
        while let Some(result) = self.uploads.join_next().await {
            if let Err(err) = result {
                warn!(%err, "upload task panicked");
            }
        }
    }

    // ── Transport wrappers: failures are logged, never fatal ─────────────────

    async fn post(&self, body: MessageBody) -> Option<MessageRef> {
        match self.transport.post(&self.destination, &body).await {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(%err, conversation = %self.conversation, "failed to post message");
                None
            }
        }
    }

    async fn update(&self, message: &MessageRef, body: &MessageBody) {
        if let Err(err) = self.transport.update(message, body).await {
            warn!(%err, conversation = %self.conversation, "failed to update message");
        }
    }

    async fn delete(&self, message: &MessageRef) {
        if let Err(err) = self.transport.delete(message).await {
            warn!(%err, conversation = %self.conversation, "failed to delete message");
        }
    }
}

fn short_id(id: &str) -> &str {
    let start = id.len().saturating_sub(8);
    id.get(start..).unwrap_or(id)
}
