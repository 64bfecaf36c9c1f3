//! Slack Block Kit message builders.

use slack_morphism::prelude::{
    SlackActionBlockElement, SlackActionsBlock, SlackBlock, SlackBlockButtonElement,
    SlackBlockId, SlackBlockPlainTextOnly, SlackBlockText, SlackSectionBlock,
};

/// Action ID of the Cancel button shown on heartbeat messages.
pub const CANCEL_ACTION_ID: &str = "relay_cancel";

/// Build a markdown section block.
#[must_use]
pub fn text_section(text: &str) -> SlackBlock {
    SlackBlock::Section(
        SlackSectionBlock::new().with_text(SlackBlockText::MarkDown(text.into())),
    )
}

/// Build an actions block with the given `(action_id, label, value)` buttons.
#[must_use]
pub fn action_buttons(block_id: &str, buttons: &[(&str, &str, &str)]) -> SlackBlock {
    let elements: Vec<SlackActionBlockElement> = buttons
        .iter()
        .map(|(action_id, text, value)| {
            SlackActionBlockElement::Button(
                SlackBlockButtonElement::new(SlackBlockPlainTextOnly::from(*text))
                    .with_action_id((*action_id).into())
                    .with_value((*value).into()),
            )
        })
        .collect();
    SlackBlock::Actions(
        SlackActionsBlock::new(elements).with_block_id(SlackBlockId(block_id.into())),
    )
}

/// Message blocks with a Cancel button targeting `conversation`.
#[must_use]
pub fn cancellable(text: &str, conversation: &str) -> Vec<SlackBlock> {
    vec![
        text_section(text),
        action_buttons(
            &format!("cancel_{conversation}"),
            &[(CANCEL_ACTION_ID, "Cancel", conversation)],
        ),
    ]
}
