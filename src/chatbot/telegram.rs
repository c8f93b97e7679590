//! Telegram client using teloxide.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{CallbackQueryId, InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ReplyParameters};
use tracing::{debug, warn};

/// A labelled button whose press sends `payload` back to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionButton {
    pub label: String,
    pub payload: String,
}

/// What the engine needs from the chat platform.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Send `text`, optionally as a reply and with one row of buttons.
    /// Returns the new message id.
    async fn reply(
        &self,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i64>,
        buttons: &[ActionButton],
    ) -> Result<i64, String>;

    /// Answer a button press so the client stops showing a spinner.
    async fn acknowledge(&self, query_id: &str) -> Result<(), String>;

    /// Remove the buttons from a sent message.
    async fn clear_buttons(&self, chat_id: i64, message_id: i64) -> Result<(), String>;
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn keyboard(buttons: &[ActionButton]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        buttons
            .iter()
            .map(|b| InlineKeyboardButton::callback(b.label.clone(), b.payload.clone()))
            .collect::<Vec<_>>(),
    ])
}

#[async_trait]
impl ChatApi for TelegramClient {
    async fn reply(
        &self,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i64>,
        buttons: &[ActionButton],
    ) -> Result<i64, String> {
        let mut request = self.bot.send_message(ChatId(chat_id), text);

        if let Some(msg_id) = reply_to_message_id {
            request = request.reply_parameters(ReplyParameters::new(MessageId(msg_id as i32)));
        }

        if !buttons.is_empty() {
            request = request.reply_markup(keyboard(buttons));
        }

        request.await.map(|msg| msg.id.0 as i64).map_err(|e| {
            let msg = format!("Failed to send: {e}");
            warn!("{}", msg);
            msg
        })
    }

    async fn acknowledge(&self, query_id: &str) -> Result<(), String> {
        debug!("Answering callback {}", query_id);
        self.bot
            .answer_callback_query(CallbackQueryId(query_id.to_string()))
            .await
            .map_err(|e| {
                let msg = format!("Failed to answer callback: {e}");
                warn!("{}", msg);
                msg
            })?;
        Ok(())
    }

    async fn clear_buttons(&self, chat_id: i64, message_id: i64) -> Result<(), String> {
        self.bot
            .edit_message_reply_markup(ChatId(chat_id), MessageId(message_id as i32))
            .await
            .map_err(|e| {
                let msg = format!("Failed to remove buttons: {e}");
                warn!("{}", msg);
                msg
            })?;
        Ok(())
    }
}
