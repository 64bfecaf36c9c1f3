//! Session executor: runs tasks end to end.
//!
//! [`SessionExecutor::submit`] is the single entry point for prompts. It
//! admits the task through the [`ConversationScheduler`], waits for a global
//! worker slot, and hands the task to a background drive loop. The drive
//! loop runs the task, then keeps running whatever the scheduler dequeues
//! for the same conversation until its queue is empty.
//!
//! Running one task means: read the continuation (or fork) token, spawn the
//! worker, decode its stdout, feed the renderer, and write every token the
//! worker reports straight back to the store. A context-window overflow
//! reported by the worker triggers one compaction run followed by one
//! continuation run before the task completes.

use std::sync::Arc;

use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::{RenderConfig, WorkerConfig};
use crate::models::event::StreamEvent;
use crate::models::task::{MessageBody, MessageRef, Task};
use crate::orchestrator::heartbeat::HeartbeatTicker;
use crate::orchestrator::scheduler::{Admission, ConversationScheduler};
use crate::persistence::continuation_store::ContinuationStore;
use crate::render::{IncrementalRenderer, RenderOutcome};
use crate::slack::transport::ChatTransport;
use crate::worker::decoder::decode_line;
use crate::worker::runner::{ProcessRunner, RunRequest};
use crate::Result;

/// Reaction shown on the user's message while its task runs.
pub const REACTION_RUNNING: &str = "hourglass_flowing_sand";
/// Reaction for a task that completed.
pub const REACTION_DONE: &str = "white_check_mark";
/// Reaction for a task that failed.
pub const REACTION_FAILED: &str = "x";
/// Reaction for a task that was cancelled or timed out.
pub const REACTION_CANCELLED: &str = "no_entry_sign";

enum Step {
    Line(Option<Result<String>>),
    Tick(Instant),
    Flush,
}

/// Runs tasks, one at a time per conversation.
pub struct SessionExecutor {
    scheduler: Arc<ConversationScheduler>,
    store: Arc<ContinuationStore>,
    runner: ProcessRunner,
    transport: Arc<dyn ChatTransport>,
    worker: WorkerConfig,
    render: RenderConfig,
    shutdown: CancellationToken,
}

impl SessionExecutor {
    /// Assemble an executor.
    #[must_use]
    pub fn new(
        scheduler: Arc<ConversationScheduler>,
        store: Arc<ContinuationStore>,
        runner: ProcessRunner,
        transport: Arc<dyn ChatTransport>,
        worker: WorkerConfig,
        render: RenderConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            scheduler,
            store,
            runner,
            transport,
            worker,
            render,
            shutdown,
        }
    }

    /// Scheduler shared with the command handlers.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<ConversationScheduler> {
        &self.scheduler
    }

    /// Continuation store shared with the command handlers.
    #[must_use]
    pub fn store(&self) -> &Arc<ContinuationStore> {
        &self.store
    }

    /// Submit a task.
    ///
    /// Returns the queue position: `0` when the task started, otherwise its
    /// 1-indexed place behind the running task. When the global worker pool
    /// is exhausted this waits for a free slot.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Shutdown` if shutdown begins while waiting for a
    /// worker slot. The conversation is released in that case.
    pub async fn submit(self: &Arc<Self>, task: Task) -> Result<usize> {
        let destination = task.destination.clone();
        let conversation = task.conversation.clone();

        match self.scheduler.submit(task).await {
            Admission::Queued { position } => {
                info!(conversation, position, "task queued");
                let notice = MessageBody::text(format!(
                    ":inbox_tray: Queued (position {position}). I'll start once the current task finishes."
                ));
                if let Err(err) = self.transport.post(&destination, &notice).await {
                    warn!(%err, conversation, "failed to post queue notice");
                }
                Ok(position)
            }
            Admission::RunNow(task) => {
                let permit = match self.scheduler.acquire_worker(&self.shutdown).await {
                    Ok(permit) => permit,
                    Err(err) => {
                        self.release_conversation(&conversation).await;
                        return Err(err);
                    }
                };
                let executor = Arc::clone(self);
                tokio::spawn(async move { executor.drive(task, permit).await });
                Ok(0)
            }
        }
    }

    /// Run `task`, then every task dequeued after it for the same conversation.
    async fn drive(self: Arc<Self>, mut task: Task, mut permit: OwnedSemaphorePermit) {
        loop {
            let conversation = task.conversation.clone();
            let span = info_span!("task", task_id = %task.id, conversation = %conversation);
            self.run_task(&task).instrument(span).await;
            drop(permit);

            let Some(next) = self.scheduler.complete(&conversation).await else {
                return;
            };
            task = next;

            permit = match self.scheduler.acquire_worker(&self.shutdown).await {
                Ok(permit) => permit,
                Err(err) => {
                    warn!(%err, conversation, "abandoning queued tasks");
                    self.release_conversation(&conversation).await;
                    return;
                }
            };
        }
    }

    /// Run one task to completion and mark the user's message accordingly.
    async fn run_task(&self, task: &Task) -> RenderOutcome {
        let cancel = self.shutdown.child_token();
        self.scheduler
            .set_active(&task.conversation, cancel.clone())
            .await;

        self.react(task.source.as_ref(), REACTION_RUNNING, true).await;
        info!(prompt_chars = task.prompt.chars().count(), "task started");

        let outcome = self.execute(task, &cancel).await;

        self.react(task.source.as_ref(), REACTION_RUNNING, false)
            .await;
        let reaction = match &outcome {
            RenderOutcome::Completed => REACTION_DONE,
            RenderOutcome::Interrupted(_) => REACTION_CANCELLED,
            RenderOutcome::Failed(_) | RenderOutcome::ContextOverflow => REACTION_FAILED,
        };
        self.react(task.source.as_ref(), reaction, true).await;

        info!(?outcome, "task finished");
        outcome
    }

    async fn execute(&self, task: &Task, cancel: &CancellationToken) -> RenderOutcome {
        let outcome = self.invoke(task, &task.effective_prompt(), cancel).await;
        if outcome != RenderOutcome::ContextOverflow {
            return outcome;
        }

        info!("recovering from context overflow");
        let compacted = self.invoke(task, &self.worker.compact_prompt, cancel).await;
        let outcome = match compacted {
            RenderOutcome::Completed => {
                self.invoke(task, &self.worker.continue_prompt, cancel)
                    .await
            }
            other => other,
        };

        if outcome == RenderOutcome::ContextOverflow {
            let message = "context still exceeds the window after compaction".to_owned();
            let notice = MessageBody::text(format!(
                ":x: *Recovery failed:* {message}. Use `!reset` to start a fresh conversation."
            ));
            if let Err(err) = self.transport.post(&task.destination, &notice).await {
                warn!(%err, "failed to post recovery failure");
            }
            return RenderOutcome::Failed(message);
        }
        outcome
    }

    /// One worker invocation with `prompt`, rendered into the task's thread.
    async fn invoke(
        &self,
        task: &Task,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> RenderOutcome {
        let conversation = task.conversation.as_str();
        let verbose = self.store.is_verbose(conversation).await;
        let resume = self.store.get(conversation).await;
        let fork = match resume {
            Some(_) => None,
            None => self.store.pending_fork(conversation).await,
        };

        let mut renderer = IncrementalRenderer::new(
            Arc::clone(&self.transport),
            task.destination.clone(),
            conversation,
            self.render.clone(),
            verbose,
            Instant::now(),
        );
        renderer.start().await;

        let request = RunRequest {
            prompt,
            resume: resume.as_deref(),
            fork: fork.as_deref(),
            workdir: &task.workdir,
        };
        let mut process = match self.runner.spawn(&request, cancel.clone()) {
            Ok(process) => process,
            Err(err) => {
                error!(%err, "worker spawn failed");
                return renderer.finish_failed(&err, Instant::now()).await;
            }
        };

        let (tick_tx, mut tick_rx) = mpsc::channel(1);
        let mut heartbeat = HeartbeatTicker::new(
            conversation.to_owned(),
            self.render.heartbeat_tick(),
            tick_tx,
        )
        .spawn();
        let mut fork_pending = fork.is_some();

        let finished = loop {
            let deadline = renderer.next_deadline();
            let step = tokio::select! {
                biased;
                line = process.next_line() => Step::Line(line),
                Some(tick) = tick_rx.recv() => Step::Tick(tick.at),
                () = sleep_until(deadline) => Step::Flush,
            };

            match step {
                Step::Tick(at) => renderer.tick(at).await,
                Step::Flush => renderer.flush_due(Instant::now()).await,
                Step::Line(Some(Ok(line))) => {
                    let mut outcome = None;
                    for event in decode_line(&line) {
                        if let Some(token) = event.token() {
                            self.remember_token(conversation, token, &mut fork_pending)
                                .await;
                        }
                        if matches!(event, StreamEvent::Final(_)) {
                            heartbeat.stop().await;
                        }
                        outcome = renderer.handle(event, Instant::now()).await;
                        if outcome.is_some() {
                            break;
                        }
                    }
                    if outcome.is_some() {
                        break outcome;
                    }
                }
                Step::Line(Some(Err(err))) => {
                    heartbeat.stop().await;
                    let now = Instant::now();
                    let outcome = if err.is_interruption() {
                        warn!(%err, "worker run interrupted");
                        renderer.finish_interrupted(&err, now).await
                    } else {
                        error!(%err, "worker stream failed");
                        renderer.finish_failed(&err, now).await
                    };
                    break Some(outcome);
                }
                Step::Line(None) => {
                    heartbeat.stop().await;
                    break None;
                }
            }
        };

        heartbeat.stop().await;
        let exit = process.wait().await;
        match finished {
            Some(outcome) => outcome,
            None => {
                warn!(code = exit.code, "worker exited without a result");
                renderer
                    .finish_without_final(exit.code, &exit.stderr, Instant::now())
                    .await
            }
        }
    }

    /// Persist a token reported mid-stream.
    async fn remember_token(&self, conversation: &str, token: &str, fork_pending: &mut bool) {
        if let Err(err) = self.store.set(conversation, token).await {
            error!(%err, conversation, "failed to persist continuation token");
            return;
        }
        if *fork_pending {
            *fork_pending = false;
            if let Err(err) = self.store.clear_pending_fork(conversation).await {
                warn!(%err, conversation, "failed to clear pending fork");
            }
        }
    }

    async fn react(&self, message: Option<&MessageRef>, name: &str, add: bool) {
        let Some(message) = message else {
            return;
        };
        let result = if add {
            self.transport.add_reaction(message, name).await
        } else {
            self.transport.remove_reaction(message, name).await
        };
        if let Err(err) = result {
            warn!(%err, reaction = name, add, "failed to change reaction");
        }
    }

    /// Mark `conversation` idle, dropping anything still queued.
    async fn release_conversation(&self, conversation: &str) {
        let dropped = self.scheduler.clear_queue(conversation).await;
        let _ = self.scheduler.complete(conversation).await;
        if dropped > 0 {
            warn!(conversation, dropped, "queued tasks dropped");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
