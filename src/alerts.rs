//! Tracing layer that forwards warnings and errors to an operator chat.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Alerts arriving within this window after the first one go out together.
const BATCH_WINDOW: Duration = Duration::from_secs(10);

/// Telegram rejects messages over 4096 chars.
const MAX_MESSAGE_CHARS: usize = 4000;

pub struct AlertLayer {
    tx: mpsc::UnboundedSender<String>,
}

impl AlertLayer {
    /// Must be called inside a tokio runtime.
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(first) = rx.recv().await {
                let mut batch = vec![first];
                let deadline = tokio::time::sleep(BATCH_WINDOW);
                tokio::pin!(deadline);
                loop {
                    tokio::select! {
                        _ = &mut deadline => break,
                        next = rx.recv() => match next {
                            Some(alert) => batch.push(alert),
                            None => break,
                        },
                    }
                }

                // Not through tracing: a failed send would raise another alert.
                if let Err(e) = bot.send_message(chat_id, batch_text(&batch)).await {
                    eprintln!("Failed to send alert to Telegram: {e}");
                }
            }
        });

        Self { tx }
    }
}

/// Join alerts into one message, keeping it under Telegram's size limit.
fn batch_text(alerts: &[String]) -> String {
    let joined = alerts.join("\n");
    if joined.chars().count() <= MAX_MESSAGE_CHARS {
        return joined;
    }
    let truncated: String = joined.chars().take(MAX_MESSAGE_CHARS).collect();
    format!("{truncated}...")
}

fn format_alert(level: Level, message: &str) -> String {
    let icon = if level == Level::ERROR { "❌" } else { "⚠️" };
    format!("{icon} {message}")
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{} = {:?}", field.name(), value));
        }
    }
}

impl MessageVisitor {
    fn into_text(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields.join(", "),
            (false, false) => format!("{} ({})", self.message, self.fields.join(", ")),
        }
    }
}

impl<S: Subscriber> Layer<S> for AlertLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        if self.tx.send(format_alert(level, &visitor.into_text())).is_err() {
            eprintln!("Alert channel closed, alert dropped");
        }
    }
}
