//! Chatbot engine - relays Telegram messages to the generation model and
//! collects feedback on the replies.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use crate::chatbot::feedback::{self, FeedbackStore};
use crate::chatbot::gate::{gate, GateDecision, DEFAULT_REPLY_THRESHOLD};
use crate::chatbot::inference::{DecodingConfig, GenerationError, Generator};
use crate::chatbot::logs::ChatLogs;
use crate::chatbot::message::{now_timestamp, ChatType, FeedbackRecord, MessageRecord};
use crate::chatbot::telegram::{ActionButton, ChatApi};

const PRIVATE_GREETING: &str = "Hi! I'm your AI bot. Send me a message!";
const GROUP_GREETING: &str = "Hi! Add me to your group and mention me to interact.";

/// Telegram rejects messages over 4096 chars.
const MAX_REPLY_CHARS: usize = 4000;

/// Feedback labels and their button captions.
const FEEDBACK_BUTTONS: [(&str, &str); 2] = [("Good", "Good 👍"), ("Bad", "Bad 👎")];

/// Chatbot configuration.
#[derive(Debug, Clone)]
pub struct ChatbotConfig {
    /// Handle without the `@`, used to detect mentions in groups.
    pub bot_username: Option<String>,
    pub reply_threshold: f64,
    pub decoding: DecodingConfig,
    pub data_dir: PathBuf,
}

impl Default for ChatbotConfig {
    fn default() -> Self {
        Self {
            bot_username: None,
            reply_threshold: DEFAULT_REPLY_THRESHOLD,
            decoding: DecodingConfig::default(),
            data_dir: PathBuf::from("."),
        }
    }
}

/// A plain text message from a user.
#[derive(Debug, Clone)]
pub struct IncomingText {
    pub message_id: i64,
    pub chat_id: i64,
    pub chat_type: ChatType,
    pub user_id: i64,
    pub username: Option<String>,
    pub text: String,
}

/// A press on one of the feedback buttons.
#[derive(Debug, Clone)]
pub struct FeedbackPress {
    pub query_id: String,
    pub user_id: i64,
    pub username: Option<String>,
    pub data: String,
    /// Chat and message the buttons are attached to, if Telegram still has it.
    pub source: Option<(i64, i64)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextOutcome {
    /// The group gate decided to stay quiet.
    Skipped,
    Replied { feedback_id: String },
    /// Generation failed and the error was shown to the user.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackOutcome {
    Logged,
    /// Id unknown or expired, e.g. after a restart.
    Unknown,
    /// Payload was not `feedback:{label}:{id}`.
    Malformed,
}

pub fn greeting(chat_type: ChatType) -> &'static str {
    if chat_type == ChatType::Private {
        PRIVATE_GREETING
    } else {
        GROUP_GREETING
    }
}

/// The chatbot engine.
pub struct ChatbotEngine {
    config: ChatbotConfig,
    generator: Arc<dyn Generator>,
    telegram: Arc<dyn ChatApi>,
    feedback: FeedbackStore,
    logs: ChatLogs,
    rng: Mutex<StdRng>,
}

impl ChatbotEngine {
    pub fn new(
        config: ChatbotConfig,
        generator: Arc<dyn Generator>,
        telegram: Arc<dyn ChatApi>,
        feedback: FeedbackStore,
    ) -> Self {
        Self::with_rng(config, generator, telegram, feedback, StdRng::from_os_rng())
    }

    /// Create an engine with a caller-supplied random source for the group gate.
    pub fn with_rng(
        config: ChatbotConfig,
        generator: Arc<dyn Generator>,
        telegram: Arc<dyn ChatApi>,
        feedback: FeedbackStore,
        rng: StdRng,
    ) -> Self {
        let logs = ChatLogs::new(&config.data_dir);
        Self {
            config,
            generator,
            telegram,
            feedback,
            logs,
            rng: Mutex::new(rng),
        }
    }

    pub fn feedback(&self) -> &FeedbackStore {
        &self.feedback
    }

    pub fn logs(&self) -> &ChatLogs {
        &self.logs
    }

    /// Handle `/start`.
    pub async fn handle_start(&self, chat_id: i64, chat_type: ChatType, message_id: i64) {
        info!("👋 /start in {} chat {}", chat_type, chat_id);
        let _ = self
            .telegram
            .reply(chat_id, greeting(chat_type), Some(message_id), &[])
            .await;
    }

    /// Handle a plain text message: log it, gate it, answer it.
    pub async fn handle_text(&self, msg: IncomingText) -> TextOutcome {
        info!(
            "📨 {} ({}) in {}: \"{}\"",
            msg.username.as_deref().unwrap_or("unknown"),
            msg.user_id,
            msg.chat_id,
            msg.text.chars().take(50).collect::<String>()
        );

        let record = MessageRecord {
            chat_id: msg.chat_id,
            user_id: msg.user_id,
            username: msg.username.clone(),
            message: msg.text.clone(),
            timestamp: now_timestamp(),
            chat_type: msg.chat_type,
        };
        if let Err(e) = self.logs.log_message(&record) {
            error!("Error logging message for chat {}: {}", msg.chat_id, e);
        }

        let roll = self.roll();
        let prompt = match gate(
            &msg.text,
            msg.chat_type,
            self.config.bot_username.as_deref(),
            self.config.reply_threshold,
            roll,
        ) {
            GateDecision::Respond(prompt) => prompt,
            GateDecision::Skip => {
                info!("💤 Staying quiet in {} (roll {:.2})", msg.chat_id, roll);
                return TextOutcome::Skipped;
            }
        };

        match self.generator.generate(&prompt, &self.config.decoding).await {
            Ok(response) => {
                let feedback_id = self.feedback.register(msg.chat_id, &prompt, &response);
                let buttons: Vec<ActionButton> = FEEDBACK_BUTTONS
                    .iter()
                    .map(|(label, caption)| ActionButton {
                        label: caption.to_string(),
                        payload: feedback::payload(label, &feedback_id),
                    })
                    .collect();

                if let Ok(sent_id) = self
                    .telegram
                    .reply(msg.chat_id, &response, Some(msg.message_id), &buttons)
                    .await
                {
                    info!("✅ Replied in {} (msg {})", msg.chat_id, sent_id);
                }
                TextOutcome::Replied { feedback_id }
            }
            Err(e) => {
                warn!("Generation failed for chat {}: {}", msg.chat_id, e);
                let _ = self
                    .telegram
                    .reply(msg.chat_id, &error_reply(&e), Some(msg.message_id), &[])
                    .await;
                TextOutcome::Failed
            }
        }
    }

    /// Handle a Good/Bad press.
    ///
    /// The press is always acknowledged and the buttons are always removed,
    /// whether or not the exchange is still known.
    pub async fn handle_feedback(&self, press: FeedbackPress) -> FeedbackOutcome {
        let _ = self.telegram.acknowledge(&press.query_id).await;

        let outcome = match feedback::parse_payload(&press.data) {
            None => {
                warn!("Ignoring callback with unexpected data: {:?}", press.data);
                FeedbackOutcome::Malformed
            }
            Some((label, id)) => match self.feedback.get(id) {
                None => {
                    info!("Feedback {} for unknown exchange {}", label, id);
                    FeedbackOutcome::Unknown
                }
                Some(entry) => {
                    info!("📝 {} feedback from {} on {}", label, press.user_id, id);
                    let record = FeedbackRecord {
                        user_id: press.user_id,
                        username: press.username.clone(),
                        chat_id: entry.chat_id,
                        user_message: entry.user_message,
                        bot_response: entry.bot_response,
                        feedback: label.to_string(),
                        timestamp: now_timestamp(),
                    };
                    if let Err(e) = self.logs.log_feedback(&record) {
                        error!("Error logging feedback for chat {}: {}", entry.chat_id, e);
                    }
                    FeedbackOutcome::Logged
                }
            },
        };

        if let Some((chat_id, message_id)) = press.source {
            let _ = self.telegram.clear_buttons(chat_id, message_id).await;
        }

        outcome
    }

    fn roll(&self) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.random()
    }
}

/// Text shown to the user when generation fails, cut to one message.
pub fn error_reply(err: &GenerationError) -> String {
    let text = format!("An error occurred: {err}");
    if text.chars().count() <= MAX_REPLY_CHARS {
        return text;
    }
    let truncated: String = text.chars().take(MAX_REPLY_CHARS).collect();
    format!("{truncated}...")
}
