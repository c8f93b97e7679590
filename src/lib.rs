pub mod alerts;
pub mod chatbot;
pub mod config;
