use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use teloxide::types::ChatId;

use crate::chatbot::gate::DEFAULT_REPLY_THRESHOLD;

/// Environment variable consulted when the config file leaves the token empty.
pub const TOKEN_ENV_VAR: &str = "TELEGRAM_BOT_TOKEN";

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    /// Falls back to $TELEGRAM_BOT_TOKEN when empty.
    #[serde(default)]
    telegram_bot_token: String,
    /// Base URL of the inference server (e.g., "http://localhost:8080").
    inference_endpoint: String,
    /// Directory for chat_logs/, feedback_logs/ and logs/. Defaults to current directory.
    data_dir: Option<String>,
    #[serde(default = "default_reply_threshold")]
    group_reply_threshold: f64,
    /// Forget unrated replies after this many minutes. Unset = never.
    feedback_ttl_minutes: Option<u64>,
    /// Chat that receives warnings and errors.
    log_chat_id: Option<i64>,
}

fn default_reply_threshold() -> f64 {
    DEFAULT_REPLY_THRESHOLD
}

pub struct Config {
    pub telegram_bot_token: String,
    pub inference_endpoint: String,
    pub data_dir: PathBuf,
    pub group_reply_threshold: f64,
    pub feedback_ttl: Option<Duration>,
    pub log_chat_id: Option<ChatId>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env(path, std::env::var(TOKEN_ENV_VAR).ok())
    }

    /// Load with an explicit fallback token instead of reading the environment.
    pub fn load_with_env<P: AsRef<Path>>(path: P, env_token: Option<String>) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        let telegram_bot_token = if file.telegram_bot_token.is_empty() {
            env_token.unwrap_or_default()
        } else {
            file.telegram_bot_token
        };
        validate_token(&telegram_bot_token)?;

        let inference_endpoint = file.inference_endpoint.trim().to_string();
        if !(inference_endpoint.starts_with("http://") || inference_endpoint.starts_with("https://")) {
            return Err(ConfigError::Validation(
                "inference_endpoint must be an http:// or https:// URL".into(),
            ));
        }

        if !(0.0..=1.0).contains(&file.group_reply_threshold) {
            return Err(ConfigError::Validation(format!(
                "group_reply_threshold must be between 0 and 1, got {}",
                file.group_reply_threshold
            )));
        }

        let feedback_ttl = match file.feedback_ttl_minutes {
            Some(0) => {
                return Err(ConfigError::Validation(
                    "feedback_ttl_minutes must be positive (omit it to keep entries forever)".into(),
                ));
            }
            Some(minutes) => Some(minutes.checked_mul(60).map(Duration::from_secs).ok_or_else(|| {
                ConfigError::Validation(format!("feedback_ttl_minutes is too large: {minutes}"))
            })?),
            None => None,
        };

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            telegram_bot_token,
            inference_endpoint,
            data_dir,
            group_reply_threshold: file.group_reply_threshold,
            feedback_ttl,
            log_chat_id: file.log_chat_id.map(ChatId),
        })
    }
}

fn validate_token(token: &str) -> Result<(), ConfigError> {
    if token.is_empty() {
        return Err(ConfigError::Validation(format!(
            "telegram_bot_token is required (or set {TOKEN_ENV_VAR})"
        )));
    }
    // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
    let token_parts: Vec<&str> = token.split(':').collect();
    if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
        return Err(ConfigError::Validation(
            "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
        ));
    }
    Ok(())
}
