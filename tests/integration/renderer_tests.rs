//! Incremental renderer behaviour against a recording transport.
//!
//! Time is simulated: every call passes an explicit instant derived from a
//! fixed origin, so throttling and heartbeat thresholds are deterministic.

use std::sync::Arc;
use std::time::Duration;

use agent_relay::config::RenderConfig;
use agent_relay::models::event::{FinalEvent, StreamEvent, Usage};
use agent_relay::models::task::Destination;
use agent_relay::render::renderer::{COMPOSING_SUFFIX, PLACEHOLDER_TEXT};
use agent_relay::render::{IncrementalRenderer, RenderOutcome};
use agent_relay::AppError;
use serde_json::json;
use tokio::time::Instant;

use super::test_helpers::{Op, RecordingTransport};

fn renderer(transport: &Arc<RecordingTransport>, verbose: bool, t0: Instant) -> IncrementalRenderer {
    IncrementalRenderer::new(
        transport.clone(),
        Destination::thread("C1", "100.1"),
        "C1",
        RenderConfig::default(),
        verbose,
        t0,
    )
}

fn ms(t0: Instant, millis: u64) -> Instant {
    t0 + Duration::from_millis(millis)
}

fn text(fragment: &str) -> StreamEvent {
    StreamEvent::Text {
        fragment: fragment.to_owned(),
    }
}

fn tool(name: &str, id: &str, input: serde_json::Value) -> StreamEvent {
    StreamEvent::ToolStart {
        name: name.to_owned(),
        id: id.to_owned(),
        input,
    }
}

fn success(result: &str) -> StreamEvent {
    StreamEvent::Final(FinalEvent {
        result_text: result.to_owned(),
        token: Some("sess-1".into()),
        turns: 2,
        duration_ms: 1500,
        usage: Usage {
            input_tokens: 100,
            output_tokens: 50,
            ..Usage::default()
        },
        ..FinalEvent::default()
    })
}

// ── Text streaming ───────────────────────────────────────────────────────────

#[tokio::test]
async fn text_fragments_concatenate_without_duplication() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    assert!(r.handle(text("Hello, "), t0).await.is_none());
    assert!(r.handle(text("world"), ms(t0, 100)).await.is_none());
    let outcome = r.handle(success("Hello, world"), ms(t0, 200)).await;

    assert_eq!(outcome, Some(RenderOutcome::Completed));
    let visible = transport.visible();
    assert_eq!(visible.len(), 2, "answer plus stats: {visible:?}");
    assert_eq!(visible[0], "Hello, world");
    assert!(visible[1].starts_with("_turns: 2 | tokens: 100 in / 50 out | 1.5s_"));
}

#[tokio::test]
async fn first_fragment_posts_immediately_with_composing_marker() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    r.handle(text("Working on it"), t0).await;

    assert_eq!(
        transport.posts(),
        vec![format!("Working on it{COMPOSING_SUFFIX}")]
    );
}

#[tokio::test]
async fn text_is_throttled_until_interval_elapses() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    r.handle(text("a"), t0).await;
    r.handle(text("b"), ms(t0, 100)).await;
    r.handle(text("c"), ms(t0, 200)).await;
    assert_eq!(transport.ops().len(), 1, "only the first flush so far");
    assert_eq!(r.next_deadline(), Some(ms(t0, 500)));

    r.flush_due(ms(t0, 499)).await;
    assert_eq!(transport.ops().len(), 1);

    r.flush_due(ms(t0, 500)).await;
    assert_eq!(transport.visible(), vec![format!("abc{COMPOSING_SUFFIX}")]);
    assert_eq!(r.next_deadline(), None);
}

#[tokio::test]
async fn large_buffer_flushes_after_minimum_interval() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    r.handle(text("start "), t0).await;
    let bulk = "x".repeat(600);
    r.handle(text(&bulk), ms(t0, 100)).await;
    assert_eq!(transport.ops().len(), 1, "min interval not reached");

    r.handle(text("y"), ms(t0, 250)).await;
    let visible = transport.visible();
    assert_eq!(visible.len(), 1);
    assert!(visible[0].starts_with("start xxx"));
    assert!(visible[0].contains('y'));
}

#[tokio::test]
async fn long_answer_is_split_across_messages() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    let paragraph = format!("{}\n", "word ".repeat(100));
    let long = paragraph.repeat(10);
    r.handle(success(&long), t0).await;

    let posts = transport.posts();
    let answer: Vec<&String> = posts.iter().filter(|p| p.starts_with("word")).collect();
    assert_eq!(answer.len(), 2);
    assert!(answer.iter().all(|chunk| chunk.chars().count() <= 3500));
}

// ── Placeholder and init ─────────────────────────────────────────────────────

#[tokio::test]
async fn placeholder_becomes_init_announcement() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    r.start().await;
    r.handle(
        StreamEvent::Init {
            model: Some("opus".into()),
            cwd: Some("/work".into()),
            token: Some("sess-1".into()),
        },
        t0,
    )
    .await;

    assert_eq!(transport.posts(), vec![PLACEHOLDER_TEXT.to_owned()]);
    assert_eq!(
        transport.visible(),
        vec![":robot_face: _session started | model `opus` | `/work`_".to_owned()]
    );
}

#[tokio::test]
async fn unused_placeholder_is_removed_at_finish() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    r.start().await;
    r.handle(success("done"), ms(t0, 10)).await;

    let visible = transport.visible();
    assert_eq!(visible.len(), 2);
    assert_eq!(visible[0], "done");
    assert!(!visible.iter().any(|t| t == PLACEHOLDER_TEXT));
}

#[tokio::test]
async fn empty_result_reports_no_response() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    r.handle(success("  "), t0).await;

    assert_eq!(transport.visible()[0], "_(no response)_");
}

// ── Tool batching ────────────────────────────────────────────────────────────

#[tokio::test]
async fn read_read_write_yields_two_tool_messages() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    r.handle(tool("Read", "t1", json!({"file_path": "src/a.rs"})), t0)
        .await;
    r.handle(tool("Read", "t2", json!({"file_path": "src/b.rs"})), ms(t0, 100))
        .await;
    r.handle(tool("Write", "t3", json!({"file_path": "src/c.rs"})), ms(t0, 200))
        .await;
    r.handle(success(""), ms(t0, 300)).await;

    let tool_posts: Vec<String> = transport
        .posts()
        .into_iter()
        .filter(|p| p.starts_with(":mag:") || p.starts_with(":pencil2:"))
        .collect();
    assert_eq!(tool_posts.len(), 2, "{tool_posts:?}");
    assert_eq!(
        tool_posts[0],
        ":mag: `Read` src/a.rs\n:mag: `Read` src/b.rs"
    );
    assert_eq!(tool_posts[1], ":pencil2: `Write` src/c.rs");
}

#[tokio::test]
async fn same_category_outside_window_starts_new_batch() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    r.handle(tool("Grep", "t1", json!({"pattern": "fn main"})), t0)
        .await;
    r.handle(tool("Glob", "t2", json!({"pattern": "**/*.rs"})), ms(t0, 1500))
        .await;
    r.handle(success(""), ms(t0, 1600)).await;

    assert_eq!(transport.count_posts_containing(":mag:"), 2);
}

#[tokio::test]
async fn pending_batch_flushes_when_window_expires() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    r.handle(tool("Bash", "t1", json!({"command": "cargo fmt"})), t0)
        .await;
    assert!(transport.posts().is_empty());
    assert_eq!(r.next_deadline(), Some(ms(t0, 1000)));

    r.flush_due(ms(t0, 1000)).await;
    assert_eq!(transport.posts(), vec![":computer: `Bash` cargo fmt".to_owned()]);
}

#[tokio::test]
async fn tool_call_ends_current_text_segment() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    r.handle(text("Let me look."), t0).await;
    r.handle(tool("Read", "t1", json!({"file_path": "a"})), ms(t0, 50))
        .await;
    r.handle(text("Found it."), ms(t0, 60)).await;
    r.handle(success(""), ms(t0, 70)).await;

    let visible = transport.visible();
    assert_eq!(visible[0], "Let me look.");
    assert_eq!(visible[1], ":mag: `Read` a");
    assert_eq!(visible[2], "Found it.");
}

// ── Tool results ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn successful_results_shown_without_verbose() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    r.handle(tool("Read", "t1", json!({"file_path": "a"})), t0).await;
    r.handle(
        StreamEvent::ToolResult {
            id: "t1".into(),
            output: "file body\n".into(),
            is_error: false,
        },
        ms(t0, 10),
    )
    .await;
    r.handle(success(""), ms(t0, 20)).await;

    let posts = transport.posts();
    assert_eq!(posts[0], ":mag: `Read` a");
    assert_eq!(posts[1], ":white_check_mark: `Read` result:\n```\nfile body\n```");
}

#[tokio::test]
async fn empty_successful_result_reports_no_output() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    r.handle(tool("Write", "t1", json!({"file_path": "b"})), t0).await;
    r.handle(
        StreamEvent::ToolResult {
            id: "t1".into(),
            output: "  ".into(),
            is_error: false,
        },
        ms(t0, 10),
    )
    .await;

    assert_eq!(transport.count_posts_containing("`Write` (no output)"), 1);
}

#[tokio::test]
async fn tool_errors_always_shown() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    r.handle(tool("Bash", "t1", json!({"command": "false"})), t0)
        .await;
    r.handle(
        StreamEvent::ToolResult {
            id: "t1".into(),
            output: "exit status 1".into(),
            is_error: true,
        },
        ms(t0, 10),
    )
    .await;

    let posts = transport.posts();
    assert_eq!(posts[0], ":computer: `Bash` false");
    assert_eq!(posts[1], ":x: `Bash` failed:\n```\nexit status 1\n```");
}

#[tokio::test]
async fn long_result_is_previewed_and_uploaded() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    let output = "line of output\n".repeat(100);
    r.handle(tool("Bash", "toolu_0123abcdefgh", json!({"command": "ls"})), t0)
        .await;
    r.handle(
        StreamEvent::ToolResult {
            id: "toolu_0123abcdefgh".into(),
            output: output.clone(),
            is_error: false,
        },
        ms(t0, 10),
    )
    .await;
    r.handle(success(""), ms(t0, 20)).await;

    assert_eq!(transport.count_posts_containing("full output attached"), 1);
    let upload = transport
        .ops()
        .into_iter()
        .find_map(|op| match op {
            Op::Upload { filename, content } => Some((filename, content)),
            _ => None,
        })
        .expect("upload recorded");
    assert_eq!(upload.0, "bash-abcdefgh.txt");
    assert_eq!(upload.1, output.trim());
}

#[tokio::test]
async fn thinking_only_shown_in_verbose_mode() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();

    let mut quiet = renderer(&transport, false, t0);
    quiet
        .handle(
            StreamEvent::Thinking {
                fragment: "pondering".into(),
            },
            t0,
        )
        .await;
    assert!(transport.posts().is_empty());

    let mut loud = renderer(&transport, true, t0);
    loud.handle(
        StreamEvent::Thinking {
            fragment: "pondering".into(),
        },
        t0,
    )
    .await;
    assert_eq!(transport.posts(), vec![":thought_balloon: _pondering_".to_owned()]);
}

// ── Heartbeat ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn heartbeat_appears_once_and_is_removed_before_new_content() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    r.handle(text("thinking hard"), t0).await;
    r.tick(ms(t0, 2_000)).await;
    assert!(!r.heartbeat_visible());

    r.tick(ms(t0, 5_000)).await;
    r.tick(ms(t0, 6_000)).await;
    r.tick(ms(t0, 7_000)).await;
    assert!(r.heartbeat_visible());

    let heartbeats: Vec<Op> = transport
        .ops()
        .into_iter()
        .filter(|op| matches!(op, Op::Post { cancel_key: Some(_), .. }))
        .collect();
    assert_eq!(heartbeats.len(), 1, "exactly one heartbeat message");
    let Op::Post {
        ts: heartbeat_ts,
        cancel_key,
        text: body,
        ..
    } = &heartbeats[0]
    else {
        unreachable!()
    };
    assert_eq!(cancel_key.as_deref(), Some("C1"));
    assert!(body.contains("still working"));

    r.handle(text(" and more"), ms(t0, 8_000)).await;
    assert!(!r.heartbeat_visible());

    let ops = transport.ops();
    let deleted_at = ops
        .iter()
        .position(|op| matches!(op, Op::Delete { ts } if ts == heartbeat_ts))
        .expect("heartbeat deleted");
    let content_at = ops
        .iter()
        .rposition(|op| matches!(op, Op::Update { text, .. } if text.contains("and more")))
        .expect("new content written");
    assert!(deleted_at < content_at);
}

#[tokio::test]
async fn heartbeat_refreshes_in_place() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    r.tick(ms(t0, 5_000)).await;
    r.tick(ms(t0, 10_000)).await;

    let ops = transport.ops();
    assert_eq!(ops.len(), 2);
    assert!(matches!(&ops[0], Op::Post { text, .. } if text.contains("(5.0s)")));
    assert!(matches!(&ops[1], Op::Update { text, .. } if text.contains("(10.0s)")));
}

#[tokio::test]
async fn ticks_after_finish_are_ignored() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    r.handle(success("ok"), t0).await;
    let before = transport.ops().len();
    r.tick(ms(t0, 60_000)).await;

    assert_eq!(transport.ops().len(), before);
}

// ── Final outcomes ───────────────────────────────────────────────────────────

#[tokio::test]
async fn stats_warn_above_hard_watermark() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    let event = StreamEvent::Final(FinalEvent {
        result_text: "ok".into(),
        usage: Usage {
            input_tokens: 10_000,
            cache_read_input_tokens: 150_000,
            output_tokens: 2_000,
            ..Usage::default()
        },
        ..FinalEvent::default()
    });
    r.handle(event, t0).await;

    let stats = transport.posts().pop().expect("stats posted");
    assert!(stats.contains("tokens: 160,000 in / 2,000 out"));
    assert!(stats.contains("Context is very large (162,000 tokens)"));
}

#[tokio::test]
async fn context_overflow_is_not_shown_as_failure() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    let event = StreamEvent::Final(FinalEvent {
        is_error: true,
        error_message: Some("Prompt is too long: 210000 tokens".into()),
        ..FinalEvent::default()
    });
    let outcome = r.handle(event, t0).await;

    assert_eq!(outcome, Some(RenderOutcome::ContextOverflow));
    assert_eq!(transport.count_posts_containing("Worker error"), 0);
    assert_eq!(transport.count_posts_containing(":recycle:"), 1);
    assert_eq!(transport.count_posts_containing("_turns"), 0);
}

#[tokio::test]
async fn worker_error_is_reported_with_stats() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    let event = StreamEvent::Final(FinalEvent {
        is_error: true,
        error_message: Some("error_max_turns".into()),
        turns: 30,
        ..FinalEvent::default()
    });
    let outcome = r.handle(event, t0).await;

    assert_eq!(
        outcome,
        Some(RenderOutcome::Failed("error_max_turns".into()))
    );
    let posts = transport.posts();
    assert_eq!(posts[0], ":x: *Worker error:* error_max_turns");
    assert!(posts[1].starts_with("_turns: 30"));
}

#[tokio::test]
async fn exit_without_final_keeps_text_and_warns() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    r.handle(text("partial"), t0).await;
    r.handle(text(" answer"), ms(t0, 50)).await;
    let outcome = r.finish_without_final(Some(1), "segfault", ms(t0, 100)).await;

    assert!(matches!(outcome, RenderOutcome::Failed(_)));
    let visible = transport.visible();
    assert_eq!(visible[0], "partial answer");
    assert!(visible[1].contains("status 1"));
    assert!(visible[1].contains("may be incomplete"));
    assert!(visible[1].contains("segfault"));
}

#[tokio::test]
async fn timeout_and_cancel_are_interruptions() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();

    let mut timed_out = renderer(&transport, false, t0);
    let outcome = timed_out
        .finish_interrupted(&AppError::Timeout("worker exceeded 600s".into()), t0)
        .await;
    assert!(matches!(outcome, RenderOutcome::Interrupted(_)));

    let mut cancelled = renderer(&transport, false, t0);
    cancelled
        .finish_interrupted(&AppError::Cancelled("worker run cancelled".into()), t0)
        .await;

    let posts = transport.posts();
    assert_eq!(posts[0], ":alarm_clock: *Timed out* (worker exceeded 600s).");
    assert_eq!(posts[1], ":no_entry_sign: *Cancelled.*");
}

#[tokio::test]
async fn events_after_finish_are_ignored() {
    let transport = RecordingTransport::new();
    let t0 = Instant::now();
    let mut r = renderer(&transport, false, t0);

    r.handle(success("ok"), t0).await;
    let before = transport.ops().len();

    assert!(r.handle(text("late"), ms(t0, 10)).await.is_none());
    assert!(r.handle(success("again"), ms(t0, 20)).await.is_none());
    assert_eq!(transport.ops().len(), before);
}
