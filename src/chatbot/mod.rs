//! Chatbot module - relays Telegram messages to the generation model.

pub mod engine;
pub mod feedback;
pub mod gate;
pub mod inference;
pub mod logs;
pub mod message;
pub mod telegram;


pub use engine::{greeting, ChatbotConfig, ChatbotEngine};
pub use inference::InferenceClient;
pub use telegram::TelegramClient;
