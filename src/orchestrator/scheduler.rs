//! Per-conversation admission control.
//!
//! Guarantees at most one running worker invocation per conversation while
//! many conversations run concurrently. Tasks arriving for a busy
//! conversation wait in that conversation's FIFO queue; completing the
//! running task hands back the queue head so the caller can start it
//! without releasing the conversation in between.
//!
//! A global [`Semaphore`] caps the number of simultaneously running
//! invocations across all conversations, independent of the single-flight
//! rule. The conversation map is guarded by one mutex that is only held for
//! admission and queue mutation, never across worker I/O.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::models::task::Task;
use crate::{AppError, Result};

/// Result of submitting a task.
#[derive(Debug)]
pub enum Admission {
    /// The conversation was idle and is now marked busy; run the task now.
    RunNow(Task),
    /// The conversation is busy; the task waits at this 1-indexed position.
    Queued {
        /// Position in the conversation's queue.
        position: usize,
    },
}

impl Admission {
    /// Whether the task was queued.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }

    /// Queue position, `0` when the task runs immediately.
    #[must_use]
    pub fn position(&self) -> usize {
        match self {
            Self::RunNow(_) => 0,
            Self::Queued { position } => *position,
        }
    }
}

/// Snapshot of one conversation's scheduling state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversationStatus {
    /// A task is running.
    pub busy: bool,
    /// Tasks waiting behind the running one.
    pub queued: usize,
}

#[derive(Debug, Default)]
struct ConversationSlot {
    busy: bool,
    queue: VecDeque<Task>,
    /// Cancels the running invocation.
    active: Option<CancellationToken>,
}

/// Single-flight scheduler with a bounded global worker pool.
#[derive(Debug)]
pub struct ConversationScheduler {
    slots: Mutex<HashMap<String, ConversationSlot>>,
    pool: Arc<Semaphore>,
    capacity: usize,
}

impl ConversationScheduler {
    /// Create a scheduler allowing `max_workers` concurrent invocations.
    #[must_use]
    pub fn new(max_workers: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            pool: Arc::new(Semaphore::new(max_workers)),
            capacity: max_workers,
        }
    }

    /// Admit `task` or queue it behind the conversation's running task.
    pub async fn submit(&self, task: Task) -> Admission {
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(task.conversation.clone()).or_default();

        if slot.busy {
            slot.queue.push_back(task);
            let position = slot.queue.len();
            debug!(position, "task queued behind running invocation");
            return Admission::Queued { position };
        }

        slot.busy = true;
        Admission::RunNow(task)
    }

    /// Finish the running task of `conversation`.
    ///
    /// Returns the next queued task, keeping the conversation busy, or marks
    /// the conversation idle and returns `None`.
    pub async fn complete(&self, conversation: &str) -> Option<Task> {
        let mut slots = self.slots.lock().await;
        let slot = slots.get_mut(conversation)?;
        slot.active = None;

        if let Some(next) = slot.queue.pop_front() {
            debug!(
                conversation,
                remaining = slot.queue.len(),
                "dequeued next task"
            );
            return Some(next);
        }

        slot.busy = false;
        None
    }

    /// Register the cancellation handle of the running invocation.
    pub async fn set_active(&self, conversation: &str, cancel: CancellationToken) {
        let mut slots = self.slots.lock().await;
        slots.entry(conversation.to_owned()).or_default().active = Some(cancel);
    }

    /// Cancel the running invocation of `conversation`.
    ///
    /// Returns whether an invocation was running.
    pub async fn cancel(&self, conversation: &str) -> bool {
        let slots = self.slots.lock().await;
        match slots.get(conversation).and_then(|slot| slot.active.as_ref()) {
            Some(token) => {
                token.cancel();
                info!(conversation, "cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Drop every queued task of `conversation`, returning how many were dropped.
    pub async fn clear_queue(&self, conversation: &str) -> usize {
        let mut slots = self.slots.lock().await;
        slots.get_mut(conversation).map_or(0, |slot| {
            let dropped = slot.queue.len();
            slot.queue.clear();
            dropped
        })
    }

    /// Current scheduling state of `conversation`.
    pub async fn status(&self, conversation: &str) -> ConversationStatus {
        let slots = self.slots.lock().await;
        slots
            .get(conversation)
            .map(|slot| ConversationStatus {
                busy: slot.busy,
                queued: slot.queue.len(),
            })
            .unwrap_or_default()
    }

    /// Wait for a free worker slot.
    ///
    /// The permit returns the slot when dropped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Shutdown` if `shutdown` fires before a slot frees.
    pub async fn acquire_worker(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => Err(AppError::Shutdown("relay shutting down".into())),
            permit = Arc::clone(&self.pool).acquire_owned() => {
                permit.map_err(|err| AppError::Shutdown(format!("worker pool closed: {err}")))
            }
        }
    }

    /// Worker slots currently free.
    #[must_use]
    pub fn available_workers(&self) -> usize {
        self.pool.available_permits()
    }

    /// Total worker slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
