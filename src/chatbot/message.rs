//! Records written to the per-chat logs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Telegram chat type, serialized the way the Bot API names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatType {
    /// Group and supergroup chats are gated; private chats and channels are not.
    pub fn is_multi_party(self) -> bool {
        matches!(self, ChatType::Group | ChatType::Supergroup)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChatType::Private => "private",
            ChatType::Group => "group",
            ChatType::Supergroup => "supergroup",
            ChatType::Channel => "channel",
        }
    }
}

impl fmt::Display for ChatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One received text message, as appended to `chat_logs/chat_{id}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub chat_id: i64,
    pub user_id: i64,
    pub username: Option<String>,
    pub message: String,
    pub timestamp: String,
    pub chat_type: ChatType,
}

/// One Good/Bad press, as appended to `feedback_logs/chat_{id}_feedback.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub user_id: i64,
    pub username: Option<String>,
    pub chat_id: i64,
    pub user_message: String,
    pub bot_response: String,
    pub feedback: String,
    pub timestamp: String,
}

/// Local time in ISO-8601 with microseconds, e.g. `2024-05-01T12:30:00.123456`.
pub fn now_timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}
