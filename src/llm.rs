//! Answer-synthesis provider abstraction.
//!
//! Mirrors the embedding module: an [`AnswerProvider`] capability trait,
//! one HTTP implementation per backend (OpenAI chat completions, Ollama
//! `/api/chat`, Gemini `generateContent`), selected once at startup.
//! Failures surface as [`CoreError::Provider`]; the pipeline returns the
//! answer text unmodified.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::embedding::send_with_retry;
use crate::error::CoreError;

/// Instruction given to every answer call. When retrieval produces no
/// context the pipeline short-circuits with [`NO_ANSWER`] instead of
/// calling the provider.
pub const SYSTEM_PROMPT: &str =
    "Answer based on context; if unavailable, reply 'answer is not available in the context'.";

/// Fixed response for queries where nothing clears the similarity
/// threshold.
pub const NO_ANSWER: &str = "answer is not available in the context";

/// Capability interface for answer generation.
#[async_trait]
pub trait AnswerProvider: Send + Sync {
    fn model_name(&self) -> &str;
    /// Produce an answer to `question` grounded in `context`.
    async fn answer(&self, question: &str, context: &str) -> Result<String, CoreError>;
}

/// Instantiate the provider named in the configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn AnswerProvider>, CoreError> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiChat::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        "gemini" => Ok(Arc::new(GeminiChat::new(config)?)),
        other => Err(CoreError::InvalidConfiguration(format!(
            "unknown llm provider: {other}"
        ))),
    }
}

fn user_message(question: &str, context: &str) -> String {
    format!("Context:\n{context}\n\nQuestion: {question}")
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, CoreError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| CoreError::Provider(format!("failed to build HTTP client: {e}")))
}

fn require_env(var: &str) -> Result<String, CoreError> {
    std::env::var(var).map_err(|_| {
        CoreError::InvalidConfiguration(format!("{var} environment variable not set"))
    })
}

// ============ OpenAI ============

pub struct OpenAiChat {
    model: String,
    api_key: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self, CoreError> {
        Ok(Self {
            model: config.model.clone(),
            api_key: require_env("OPENAI_API_KEY")?,
            client: http_client(config.timeout_secs)?,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl AnswerProvider for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn answer(&self, question: &str, context: &str) -> Result<String, CoreError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_message(question, context) },
            ],
        });

        let json = send_with_retry(
            || {
                self.client
                    .post("https://api.openai.com/v1/chat/completions")
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .json(&body)
            },
            self.max_retries,
            "OpenAI chat",
        )
        .await?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| CoreError::Provider("OpenAI chat: missing message content".into()))
    }
}

// ============ Ollama ============

pub struct OllamaChat {
    model: String,
    url: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self, CoreError> {
        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            client: http_client(config.timeout_secs)?,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl AnswerProvider for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn answer(&self, question: &str, context: &str) -> Result<String, CoreError> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_message(question, context) },
            ],
        });

        let json = send_with_retry(
            || {
                self.client
                    .post(format!("{}/api/chat", self.url))
                    .json(&body)
            },
            self.max_retries,
            "Ollama chat",
        )
        .await?;

        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| CoreError::Provider("Ollama chat: missing message content".into()))
    }
}

// ============ Gemini ============

pub struct GeminiChat {
    model: String,
    api_key: String,
    url: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl GeminiChat {
    pub fn new(config: &LlmConfig) -> Result<Self, CoreError> {
        Ok(Self {
            model: config.model.clone(),
            api_key: require_env("GOOGLE_API_KEY")?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            client: http_client(config.timeout_secs)?,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl AnswerProvider for GeminiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn answer(&self, question: &str, context: &str) -> Result<String, CoreError> {
        let body = serde_json::json!({
            "systemInstruction": { "parts": [ { "text": SYSTEM_PROMPT } ] },
            "contents": [
                {
                    "role": "user",
                    "parts": [ { "text": user_message(question, context) } ],
                }
            ],
        });

        let endpoint = format!(
            "{}/models/{}:generateContent?key={}",
            self.url, self.model, self.api_key
        );

        let json = send_with_retry(
            || self.client.post(&endpoint).json(&body),
            self.max_retries,
            "Gemini chat",
        )
        .await?;

        json.pointer("/candidates/0/content/parts/0/text")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| CoreError::Provider("Gemini chat: missing candidate text".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_is_invalid_configuration() {
        let config = LlmConfig {
            provider: "acme".to_string(),
            model: "m".to_string(),
            url: None,
            max_retries: 0,
            timeout_secs: 5,
        };
        let err = create_provider(&config).err().unwrap();
        assert!(matches!(err, CoreError::InvalidConfiguration(_)));
    }

    #[test]
    fn user_message_carries_context_and_question() {
        let msg = user_message("what is rust?", "Rust is a language.");
        assert!(msg.starts_with("Context:\nRust is a language."));
        assert!(msg.ends_with("Question: what is rust?"));
    }
}
