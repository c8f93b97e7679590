//! Decides whether the bot answers a message and with which prompt.

use crate::chatbot::message::ChatType;

/// Default skip threshold for unmentioned group messages.
///
/// A roll above this skips the message, so roughly a third of them get a reply.
pub const DEFAULT_REPLY_THRESHOLD: f64 = 0.33;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Answer, using this text as the prompt.
    Respond(String),
    /// Stay quiet.
    Skip,
}

/// Apply the group gate.
///
/// `roll` must be uniform in `[0, 1)`; it is only consulted for unmentioned
/// group messages. A mention is `@{bot_username}`; every occurrence is removed
/// from the prompt.
pub fn gate(
    text: &str,
    chat_type: ChatType,
    bot_username: Option<&str>,
    threshold: f64,
    roll: f64,
) -> GateDecision {
    if !chat_type.is_multi_party() {
        return GateDecision::Respond(text.to_string());
    }

    if let Some(handle) = bot_username.filter(|h| !h.is_empty()) {
        let mention = format!("@{handle}");
        if text.contains(&mention) {
            return GateDecision::Respond(text.replace(&mention, "").trim().to_string());
        }
    }

    if roll > threshold {
        GateDecision::Skip
    } else {
        GateDecision::Respond(text.to_string())
    }
}
