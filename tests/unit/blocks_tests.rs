//! Block Kit builders.

use agent_relay::slack::blocks::{self, CANCEL_ACTION_ID};
use slack_morphism::prelude::SlackBlock;

#[test]
fn cancellable_adds_button_row() {
    let built = blocks::cancellable("working…", "C123");
    assert_eq!(built.len(), 2);
    assert!(matches!(built[0], SlackBlock::Section(_)));
    assert!(matches!(built[1], SlackBlock::Actions(_)));
}

#[test]
fn cancel_button_targets_the_conversation() {
    let built = blocks::cancellable("working…", "C123");
    let json = serde_json::to_string(&built).expect("serialise blocks");

    assert!(json.contains(CANCEL_ACTION_ID));
    assert!(json.contains("\"value\":\"C123\""));
    assert!(json.contains("cancel_C123"));
    assert!(json.contains("working…"));
}
