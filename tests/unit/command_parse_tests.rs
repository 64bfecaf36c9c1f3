//! Command parsing and channel/project naming.

use agent_relay::slack::client::channel_name;
use agent_relay::slack::commands::{project_dir, ChatCommand};

// ── ChatCommand::parse ───────────────────────────────────────────────────────

#[test]
fn simple_commands_parse() {
    let cases = [
        ("!ping", ChatCommand::Ping),
        ("!help", ChatCommand::Help),
        ("!status", ChatCommand::Status),
        ("!reset", ChatCommand::Reset),
        ("!cancel", ChatCommand::Cancel),
        ("!stop", ChatCommand::Cancel),
        ("!verbose", ChatCommand::Verbose),
        ("!kill", ChatCommand::Kill),
        ("  !PING  ", ChatCommand::Ping),
    ];
    for (text, expected) in cases {
        assert_eq!(ChatCommand::parse(text), Some(expected), "{text:?}");
    }
}

#[test]
fn fork_and_new_take_a_name() {
    assert_eq!(
        ChatCommand::parse("!fork  my experiment "),
        Some(ChatCommand::Fork("my experiment".into()))
    );
    assert_eq!(
        ChatCommand::parse("!new webapp"),
        Some(ChatCommand::New("webapp".into()))
    );
}

#[test]
fn fork_without_name_shows_usage() {
    assert!(matches!(
        ChatCommand::parse("!fork"),
        Some(ChatCommand::Invalid(msg)) if msg.contains("usage: `!fork <name>`")
    ));
    assert!(matches!(
        ChatCommand::parse("!new   "),
        Some(ChatCommand::Invalid(msg)) if msg.contains("usage: `!new <name>`")
    ));
}

#[test]
fn unknown_word_is_invalid() {
    assert!(matches!(
        ChatCommand::parse("!deploy now"),
        Some(ChatCommand::Invalid(msg)) if msg.contains("unknown command `!deploy`")
    ));
}

#[test]
fn prompts_are_not_commands() {
    assert_eq!(ChatCommand::parse("explain this"), None);
    assert_eq!(ChatCommand::parse("what does !ping do"), None);
    assert_eq!(ChatCommand::parse("!"), None);
    assert_eq!(ChatCommand::parse("! ping"), None);
    assert_eq!(ChatCommand::parse(""), None);
}

// ── channel_name ─────────────────────────────────────────────────────────────

#[test]
fn channel_names_are_normalized() {
    assert_eq!(channel_name("My Experiment"), "my-experiment");
    assert_eq!(channel_name("  a//b__c  "), "a-b__c");
    assert_eq!(channel_name("--edge--"), "edge");
    assert_eq!(channel_name("!!!"), "");
    assert_eq!(channel_name(&"x".repeat(100)).len(), 80);
}

// ── project_dir ──────────────────────────────────────────────────────────────

#[test]
fn existing_project_folder_is_used() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir(temp.path().join("webapp")).expect("mkdir");

    assert_eq!(project_dir(temp.path(), "webapp"), temp.path().join("webapp"));
}

#[test]
fn missing_folder_falls_back_to_root() {
    let temp = tempfile::tempdir().expect("tempdir");
    assert_eq!(project_dir(temp.path(), "nope"), temp.path());
}

#[test]
fn escaping_names_fall_back_to_root() {
    let temp = tempfile::tempdir().expect("tempdir");
    let inner = temp.path().join("root");
    std::fs::create_dir(&inner).expect("mkdir");
    std::fs::create_dir(temp.path().join("sibling")).expect("mkdir");

    assert_eq!(project_dir(&inner, "../sibling"), inner);
    assert_eq!(
        project_dir(&inner, temp.path().join("sibling").to_str().expect("utf8")),
        inner
    );
}
