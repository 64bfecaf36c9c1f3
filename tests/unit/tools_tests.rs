//! Tool classification and summaries.

use agent_relay::render::tools::{format_batch, summarize, ToolCategory};
use serde_json::json;

#[test]
fn categories_group_related_tools() {
    for name in ["Read", "Glob", "Grep", "LS", "NotebookRead"] {
        assert_eq!(ToolCategory::of(name), ToolCategory::Read, "{name}");
    }
    for name in ["Write", "Edit", "MultiEdit", "NotebookEdit"] {
        assert_eq!(ToolCategory::of(name), ToolCategory::Write, "{name}");
    }
    assert_eq!(ToolCategory::of("WebFetch"), ToolCategory::Web);
    assert_eq!(ToolCategory::of("WebSearch"), ToolCategory::Web);
}

#[test]
fn unknown_tools_are_their_own_category() {
    assert_eq!(ToolCategory::of("Bash"), ToolCategory::Other("Bash".into()));
    assert_ne!(ToolCategory::of("Bash"), ToolCategory::of("Task"));
    assert_eq!(ToolCategory::of("Bash").icon(), ":computer:");
    assert_eq!(ToolCategory::of("mcp__x__y").icon(), ":wrench:");
}

#[test]
fn summary_uses_most_telling_field() {
    assert_eq!(
        summarize("Read", &json!({"file_path": "src/main.rs", "limit": 10})),
        "`Read` src/main.rs"
    );
    assert_eq!(
        summarize("Grep", &json!({"pattern": "fn main", "path": "src"})),
        "`Grep` src"
    );
    assert_eq!(
        summarize("WebSearch", &json!({"query": "tokio select"})),
        "`WebSearch` tokio select"
    );
    assert_eq!(summarize("TodoWrite", &json!({"todos": []})), "`TodoWrite`");
}

#[test]
fn multi_line_and_long_inputs_are_shortened() {
    let summary = summarize("Bash", &json!({"command": "cargo build\ncargo test"}));
    assert_eq!(summary, "`Bash` cargo build…");

    let long = "a".repeat(300);
    let summary = summarize("Bash", &json!({ "command": long }));
    assert!(summary.ends_with('…'));
    assert!(summary.chars().count() < 140);
}

#[test]
fn batch_lines_carry_icon() {
    let text = format_batch(
        &ToolCategory::Write,
        &["`Edit` a.rs".to_owned(), "`Write` b.rs".to_owned()],
    );
    assert_eq!(text, ":pencil2: `Edit` a.rs\n:pencil2: `Write` b.rs");
}
