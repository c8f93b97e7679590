//! Text generation through an HTTP inference server.
//!
//! The server hosts the fine-tuned model and runs its decoding routine; we
//! only send the prompt and the decoding parameters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Tokens the tokenizer may leave in decoded text.
const SPECIAL_TOKENS: &[&str] = &["<|endoftext|>", "[SEP]"];

/// Decoding hyperparameters sent with every generation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodingConfig {
    pub num_beams: u32,
    pub repetition_penalty: f64,
    pub no_repeat_ngram_size: u32,
    pub top_k: u32,
    pub top_p: f64,
    pub temperature: f64,
    pub do_sample: bool,
    /// Total length cap in tokens, prompt included.
    pub max_length: u32,
    pub num_return_sequences: u32,
}

impl Default for DecodingConfig {
    fn default() -> Self {
        Self {
            num_beams: 5,
            repetition_penalty: 2.0,
            no_repeat_ngram_size: 3,
            top_k: 50,
            top_p: 0.9,
            temperature: 0.7,
            do_sample: true,
            max_length: 50,
            num_return_sequences: 1,
        }
    }
}

#[derive(Debug)]
pub enum GenerationError {
    Http(String),
    Api { status: u16, body: String },
    Parse(String),
    Empty,
}

impl std::fmt::Display for GenerationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationError::Http(e) => write!(f, "HTTP error: {e}"),
            GenerationError::Api { status, body } => write!(f, "API error {status}: {body}"),
            GenerationError::Parse(e) => write!(f, "Parse error: {e}"),
            GenerationError::Empty => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for GenerationError {}

/// Anything that can turn a prompt into text.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, config: &DecodingConfig) -> Result<String, GenerationError>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    inputs: &'a str,
    parameters: &'a DecodingConfig,
}

#[derive(Deserialize)]
struct Generated {
    generated_text: String,
}

/// Servers answer with either a single object or a list of sequences.
#[derive(Deserialize)]
#[serde(untagged)]
enum GenerateResponse {
    One(Generated),
    Many(Vec<Generated>),
}

impl GenerateResponse {
    fn into_first(self) -> Option<String> {
        match self {
            GenerateResponse::One(g) => Some(g.generated_text),
            GenerateResponse::Many(list) => list.into_iter().next().map(|g| g.generated_text),
        }
    }
}

/// Client for an inference server exposing `POST {endpoint}/generate`.
pub struct InferenceClient {
    endpoint: String,
    http: reqwest::Client,
}

impl InferenceClient {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Generator for InferenceClient {
    async fn generate(&self, prompt: &str, config: &DecodingConfig) -> Result<String, GenerationError> {
        let preview: String = prompt.chars().take(50).collect();
        info!("🧠 Generating for \"{}\"", preview);

        let request = GenerateRequest {
            inputs: prompt,
            parameters: config,
        };

        let response = self
            .http
            .post(format!("{}/generate", self.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Http(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GenerationError::Http(e.to_string()))?;

        debug!("Inference response status: {status}");

        if !status.is_success() {
            return Err(GenerationError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&body).map_err(|e| GenerationError::Parse(e.to_string()))?;
        let raw = parsed.into_first().ok_or(GenerationError::Empty)?;

        let text = strip_special_tokens(&raw);
        if text.is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(text)
    }
}

/// Remove tokenizer special tokens and surrounding whitespace.
pub fn strip_special_tokens(text: &str) -> String {
    let mut cleaned = text.to_string();
    for token in SPECIAL_TOKENS {
        cleaned = cleaned.replace(token, "");
    }
    cleaned.trim().to_string()
}
