//! Per-invocation heartbeat ticker.
//!
//! While a worker runs, a [`HeartbeatTicker`] emits a [`Tick`] at a fixed
//! resolution. The executor feeds each tick to the renderer, which decides
//! whether the silence since the last activity warrants a "still working"
//! indicator.
//!
//! The ticker must be [`stopped`](HeartbeatHandle::stop) before the closing
//! statistics message is posted: `stop` waits until the background task has
//! exited, so no tick can be observed after it returns.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

/// One heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// When the tick fired.
    pub at: Instant,
}

/// Builder for a per-invocation heartbeat ticker.
pub struct HeartbeatTicker {
    conversation: String,
    resolution: Duration,
    tick_tx: mpsc::Sender<Tick>,
}

impl HeartbeatTicker {
    /// Construct a ticker (does not start it yet).
    #[must_use]
    pub fn new(conversation: String, resolution: Duration, tick_tx: mpsc::Sender<Tick>) -> Self {
        Self {
            conversation,
            resolution,
            tick_tx,
        }
    }

    /// Spawn the background task and return its handle.
    #[must_use]
    pub fn spawn(self) -> HeartbeatHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            Self::run(self.resolution, self.tick_tx, cancel.clone())
                .instrument(info_span!("heartbeat", conversation = %self.conversation)),
        );

        HeartbeatHandle {
            join_handle: Some(task),
            cancel,
        }
    }

    async fn run(resolution: Duration, tick_tx: mpsc::Sender<Tick>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval_at(Instant::now() + resolution, resolution);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("heartbeat stopped");
                    return;
                }
                at = interval.tick() => {
                    // Drop the tick when the consumer lags behind.
                    match tick_tx.try_send(Tick { at }) {
                        Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                        Err(mpsc::error::TrySendError::Closed(_)) => return,
                    }
                }
            }
        }
    }
}

/// Handle controlling a running [`HeartbeatTicker`].
pub struct HeartbeatHandle {
    join_handle: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl HeartbeatHandle {
    /// Stop the ticker and wait for its task to exit.
    ///
    /// Idempotent: later calls return immediately.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }

    /// Whether [`stop`](Self::stop) has completed.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.join_handle.is_none()
    }
}
