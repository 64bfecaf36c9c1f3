//! Worker process runner.
//!
//! Spawns one worker invocation per task with:
//! - an argument list requesting structured streaming output, plus resume or
//!   fork arguments built from the conversation's continuation token;
//! - `kill_on_drop(true)` so an abandoned run never outlives its owner;
//! - Slack credentials stripped from the inherited environment;
//! - a hard wall-clock deadline and an external cancellation token, either of
//!   which kills the process and ends the line stream with a synthetic error.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::worker::codec::LineCodec;
use crate::{AppError, Result};

/// Environment variables removed before the worker is launched.
pub const STRIPPED_ENV_VARS: &[&str] = &["SLACK_APP_TOKEN", "SLACK_BOT_TOKEN"];

/// Bytes of stderr kept for error reports.
const STDERR_TAIL_BYTES: usize = 2048;

/// Grace period for the worker to exit after closing stdout.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Parameters of a single worker invocation.
#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'a> {
    /// Prompt text.
    pub prompt: &'a str,
    /// Continuation token to resume, if the conversation has one.
    pub resume: Option<&'a str>,
    /// Source token to fork from, when starting a forked conversation.
    pub fork: Option<&'a str>,
    /// Working directory of the worker process.
    pub workdir: &'a Path,
}

/// Builds worker command lines and spawns worker processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    binary: PathBuf,
    base_args: Vec<String>,
    timeout: Duration,
}

impl ProcessRunner {
    /// Create a runner for an already-resolved worker binary.
    #[must_use]
    pub fn new(binary: PathBuf, base_args: Vec<String>, timeout: Duration) -> Self {
        Self {
            binary,
            base_args,
            timeout,
        }
    }

    /// Create a runner from the `[worker]` config section.
    #[must_use]
    pub fn from_config(binary: PathBuf, config: &WorkerConfig) -> Self {
        Self::new(binary, config.args.clone(), config.timeout())
    }

    /// Path of the worker executable.
    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Construct the argument list for one invocation.
    ///
    /// A resume token takes precedence; a fork token is only used when the
    /// conversation has no token of its own yet.
    #[must_use]
    pub fn build_args(&self, request: &RunRequest<'_>) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.extend([
            "-p".to_owned(),
            request.prompt.to_owned(),
            "--output-format".to_owned(),
            "stream-json".to_owned(),
            "--verbose".to_owned(),
        ]);

        match (request.resume, request.fork) {
            (Some(token), _) => {
                args.extend(["--resume".to_owned(), token.to_owned()]);
            }
            (None, Some(source)) => {
                args.extend([
                    "--resume".to_owned(),
                    source.to_owned(),
                    "--fork-session".to_owned(),
                ]);
            }
            (None, None) => {}
        }

        args
    }

    /// Spawn the worker and return a handle streaming its stdout lines.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Worker` if the process cannot be spawned or its
    /// stdout cannot be captured.
    pub fn spawn(
        &self,
        request: &RunRequest<'_>,
        cancel: CancellationToken,
    ) -> Result<WorkerProcess> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.build_args(request));
        for key in STRIPPED_ENV_VARS {
            cmd.env_remove(key);
        }
        cmd.current_dir(request.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            AppError::Worker(format!(
                "failed to spawn {}: {err}",
                self.binary.display()
            ))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Worker("failed to capture worker stdout".into()))?;

        let stderr_tail = Arc::new(Mutex::new(String::new()));
        let stderr_task = child.stderr.take().map(|stderr| {
            let tail = Arc::clone(&stderr_tail);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(line = %line, "worker stderr");
                    let mut tail = tail.lock().await;
                    tail.push_str(&line);
                    tail.push('\n');
                    if tail.len() > STDERR_TAIL_BYTES {
                        let mut cut = tail.len() - STDERR_TAIL_BYTES;
                        while !tail.is_char_boundary(cut) {
                            cut += 1;
                        }
                        tail.drain(..cut);
                    }
                }
            })
        });

        info!(
            pid = child.id().unwrap_or(0),
            binary = %self.binary.display(),
            workdir = %request.workdir.display(),
            resumed = request.resume.is_some(),
            forked = request.resume.is_none() && request.fork.is_some(),
            "worker process spawned"
        );

        Ok(WorkerProcess {
            child,
            lines: FramedRead::new(stdout, LineCodec::new()),
            deadline: Instant::now() + self.timeout,
            timeout: self.timeout,
            cancel,
            stderr_tail,
            stderr_task,
            finished: false,
        })
    }
}

/// Exit status of a finished worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerExit {
    /// Exit code, when the process exited normally.
    pub code: Option<i32>,
    /// Tail of the worker's stderr.
    pub stderr: String,
}

/// A running worker invocation.
///
/// Dropping the handle kills the process.
#[derive(Debug)]
pub struct WorkerProcess {
    child: Child,
    lines: FramedRead<ChildStdout, LineCodec>,
    deadline: Instant,
    timeout: Duration,
    cancel: CancellationToken,
    stderr_tail: Arc<Mutex<String>>,
    stderr_task: Option<JoinHandle<()>>,
    finished: bool,
}

impl WorkerProcess {
    /// OS process ID, while the process is alive.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Next stdout line.
    ///
    /// - `Some(Ok(line))`: a complete line (without the newline).
    /// - `Some(Err(AppError::Timeout | AppError::Cancelled))`: the deadline
    ///   passed or cancellation was requested. The kill signal is sent before
    ///   this returns; [`WorkerProcess::wait`] reaps the process. Yielded
    ///   once, after which the stream is exhausted.
    /// - `None`: stdout reached EOF.
    ///
    /// Over-long lines are dropped and invalid UTF-8 is replaced by the codec.
    pub async fn next_line(&mut self) -> Option<Result<String>> {
        if self.finished {
            return None;
        }

        tokio::select! {
            biased;

            () = self.cancel.cancelled() => {
                self.finished = true;
                self.start_kill();
                Some(Err(AppError::Cancelled("worker run cancelled".into())))
            }

            () = tokio::time::sleep_until(self.deadline) => {
                self.finished = true;
                self.start_kill();
                Some(Err(AppError::Timeout(format!(
                    "worker exceeded {}s",
                    self.timeout.as_secs()
                ))))
            }

            item = self.lines.next() => match item {
                None => {
                    self.finished = true;
                    None
                }
                Some(Ok(line)) => Some(Ok(line)),
                Some(Err(err)) => {
                    warn!(%err, "worker stdout read failed");
                    self.finished = true;
                    Some(Err(AppError::Worker(format!("stdout read failed: {err}"))))
                }
            },
        }
    }

    /// Wait for the process to exit after its stdout closed.
    ///
    /// Kills the process if it lingers past a short grace period.
    pub async fn wait(mut self) -> WorkerExit {
        let code = match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(err)) => {
                warn!(%err, "error waiting for worker process");
                None
            }
            Err(_) => {
                warn!("worker did not exit after closing stdout, killing");
                self.kill().await;
                None
            }
        };
        // Grandchildren may hold stderr open after the worker itself exited.
        if let Some(task) = self.stderr_task.take() {
            if tokio::time::timeout(EXIT_GRACE, task).await.is_err() {
                debug!("stderr reader still busy, detaching");
            }
        }
        let stderr = self.stderr_tail().await;
        debug!(code, "worker process exited");
        WorkerExit { code, stderr }
    }

    /// Last lines the worker wrote to stderr.
    pub async fn stderr_tail(&self) -> String {
        self.stderr_tail.lock().await.trim().to_owned()
    }

    fn start_kill(&mut self) {
        if let Err(err) = self.child.start_kill() {
            warn!(%err, "failed to signal worker process");
        } else {
            info!("worker process kill signalled");
        }
    }

    async fn kill(&mut self) {
        if let Err(err) = self.child.kill().await {
            warn!(%err, "failed to kill worker process");
        } else {
            info!("worker process killed");
        }
    }
}
