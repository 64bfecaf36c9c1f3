//! Worker argument construction and process lifecycle.

use std::path::{Path, PathBuf};
use std::time::Duration;

use agent_relay::config::WorkerConfig;
use agent_relay::worker::runner::{ProcessRunner, RunRequest};
use agent_relay::AppError;
use tokio_util::sync::CancellationToken;

fn runner() -> ProcessRunner {
    ProcessRunner::new(
        PathBuf::from("claude"),
        vec!["--dangerously-skip-permissions".into()],
        Duration::from_secs(600),
    )
}

fn request<'a>(prompt: &'a str, resume: Option<&'a str>, fork: Option<&'a str>) -> RunRequest<'a> {
    RunRequest {
        prompt,
        resume,
        fork,
        workdir: Path::new("/tmp"),
    }
}

// ── Arguments ────────────────────────────────────────────────────────────────

#[test]
fn fresh_invocation_has_no_resume() {
    let args = runner().build_args(&request("hello", None, None));

    assert_eq!(
        args,
        vec![
            "--dangerously-skip-permissions",
            "-p",
            "hello",
            "--output-format",
            "stream-json",
            "--verbose",
        ]
    );
}

#[test]
fn resume_token_is_appended() {
    let args = runner().build_args(&request("next", Some("sess-1"), None));

    assert_eq!(&args[args.len() - 2..], ["--resume", "sess-1"]);
    assert!(!args.iter().any(|a| a == "--fork-session"));
}

#[test]
fn fork_source_requests_fork_session() {
    let args = runner().build_args(&request("go", None, Some("sess-src")));

    assert_eq!(&args[args.len() - 3..], ["--resume", "sess-src", "--fork-session"]);
}

#[test]
fn own_token_wins_over_fork_source() {
    let args = runner().build_args(&request("go", Some("sess-own"), Some("sess-src")));

    assert_eq!(&args[args.len() - 2..], ["--resume", "sess-own"]);
    assert!(!args.iter().any(|a| a == "--fork-session"));
}

#[test]
fn from_config_uses_configured_args() {
    let config = WorkerConfig {
        args: vec!["--model".into(), "opus".into()],
        ..WorkerConfig::default()
    };
    let runner = ProcessRunner::from_config(PathBuf::from("/usr/bin/claude"), &config);

    assert_eq!(runner.binary(), Path::new("/usr/bin/claude"));
    let args = runner.build_args(&request("x", None, None));
    assert_eq!(&args[..2], ["--model", "opus"]);
}

// ── Process lifecycle (unix only) ────────────────────────────────────────────

#[cfg(unix)]
fn sh(script: &str, timeout: Duration) -> ProcessRunner {
    // `sh -c <script> <arg0> <args…>`: the relay's own args land in $@.
    ProcessRunner::new(
        PathBuf::from("/bin/sh"),
        vec!["-c".into(), script.into(), "worker".into()],
        timeout,
    )
}

#[cfg(unix)]
#[tokio::test]
async fn streams_stdout_lines_then_eof() {
    let runner = sh("echo one; echo two", Duration::from_secs(10));
    let mut process = runner
        .spawn(&request("p", None, None), CancellationToken::new())
        .expect("spawn");

    assert_eq!(process.next_line().await.expect("line").expect("ok"), "one");
    assert_eq!(process.next_line().await.expect("line").expect("ok"), "two");
    assert!(process.next_line().await.is_none());
    assert!(process.next_line().await.is_none());

    let exit = process.wait().await;
    assert_eq!(exit.code, Some(0));
}

#[cfg(unix)]
#[tokio::test]
async fn captures_exit_code_and_stderr_tail() {
    let runner = sh("echo oops >&2; exit 7", Duration::from_secs(10));
    let mut process = runner
        .spawn(&request("p", None, None), CancellationToken::new())
        .expect("spawn");

    assert!(process.next_line().await.is_none());
    let exit = process.wait().await;
    assert_eq!(exit.code, Some(7));
    assert_eq!(exit.stderr, "oops");
}

#[cfg(unix)]
#[tokio::test]
async fn timeout_kills_worker() {
    let runner = sh("exec sleep 30", Duration::from_millis(100));
    let mut process = runner
        .spawn(&request("p", None, None), CancellationToken::new())
        .expect("spawn");

    let item = process.next_line().await.expect("synthetic error");
    assert!(matches!(item, Err(AppError::Timeout(_))));
    assert!(process.next_line().await.is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn cancellation_kills_worker() {
    let runner = sh("exec sleep 30", Duration::from_secs(30));
    let cancel = CancellationToken::new();
    let mut process = runner
        .spawn(&request("p", None, None), cancel.clone())
        .expect("spawn");

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let item = tokio::time::timeout(Duration::from_secs(5), process.next_line())
        .await
        .expect("cancel observed promptly")
        .expect("synthetic error");
    let err = item.expect_err("cancelled");
    assert!(err.is_interruption());
    assert!(matches!(err, AppError::Cancelled(_)));
}

#[cfg(unix)]
#[tokio::test]
async fn invalid_utf8_line_does_not_end_the_stream() {
    let runner = sh(r"printf 'one\n\377\376bad\ntwo\n'", Duration::from_secs(10));
    let mut process = runner
        .spawn(&request("p", None, None), CancellationToken::new())
        .expect("spawn");

    assert_eq!(process.next_line().await.expect("line").expect("ok"), "one");
    let garbled = process.next_line().await.expect("line").expect("ok");
    assert!(garbled.ends_with("bad"));
    assert_eq!(process.next_line().await.expect("line").expect("ok"), "two");
    assert!(process.next_line().await.is_none());
    assert_eq!(process.wait().await.code, Some(0));
}

#[cfg(unix)]
#[tokio::test]
async fn over_long_line_is_skipped_and_later_lines_arrive() {
    let runner = sh(
        "echo one; head -c 17000000 /dev/zero | tr '\\0' a; echo; echo two",
        Duration::from_secs(60),
    );
    let mut process = runner
        .spawn(&request("p", None, None), CancellationToken::new())
        .expect("spawn");

    assert_eq!(process.next_line().await.expect("line").expect("ok"), "one");
    assert_eq!(process.next_line().await.expect("line").expect("ok"), "two");
    assert!(process.next_line().await.is_none());
    assert_eq!(process.wait().await.code, Some(0));
}

#[cfg(unix)]
#[tokio::test]
async fn cancellation_error_is_returned_on_first_poll() {
    use futures_util::FutureExt;

    let runner = sh("exec sleep 30", Duration::from_secs(30));
    let cancel = CancellationToken::new();
    let mut process = runner
        .spawn(&request("p", None, None), cancel.clone())
        .expect("spawn");
    cancel.cancel();

    // A caller racing next_line against other branches may drop it after one
    // poll; the error must already be produced by then.
    let item = process
        .next_line()
        .now_or_never()
        .expect("ready without awaiting the kill")
        .expect("synthetic error");
    assert!(matches!(item, Err(AppError::Cancelled(_))));
    assert!(process.next_line().await.is_none());

    let exit = tokio::time::timeout(Duration::from_secs(10), process.wait())
        .await
        .expect("killed worker is reaped");
    assert_eq!(exit.code, None);
}

#[tokio::test]
async fn missing_binary_is_a_worker_error() {
    let runner = ProcessRunner::new(
        PathBuf::from("/definitely/not/here"),
        Vec::new(),
        Duration::from_secs(1),
    );

    let result = runner.spawn(&request("p", None, None), CancellationToken::new());

    assert!(matches!(result, Err(AppError::Worker(_))));
}
