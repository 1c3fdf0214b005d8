//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and three HTTP-backed
//! implementations:
//!
//! - **[`OpenAiEmbedder`]** — `POST /v1/embeddings` (requires `OPENAI_API_KEY`).
//! - **[`OllamaEmbedder`]** — a local Ollama instance's `/api/embed` endpoint.
//! - **[`GeminiEmbedder`]** — Google's `batchEmbedContents` endpoint
//!   (requires `GOOGLE_API_KEY`).
//!
//! The provider is selected once at startup by [`create_provider`]; there is
//! no per-call dispatch. Providers do not retry silently past the configured
//! `max_retries`; exhausted retries surface as [`CoreError::Provider`] and
//! the pipeline decides what to do.
//!
//! # Retry Strategy
//!
//! Transient failures use exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use reqwest::RequestBuilder;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::CoreError;

/// Capability interface for embedding backends.
///
/// `embed` maps a batch of texts to fixed-dimension vectors, one per input,
/// in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts. Same order and length as the input.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError>;
}

/// Instantiate the provider named in the configuration.
///
/// Fails with [`CoreError::InvalidConfiguration`] for unknown names and
/// missing API keys — misconfiguration is fatal at startup, not a
/// per-request condition.
pub fn create_provider(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, CoreError> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "gemini" => Ok(Arc::new(GeminiEmbedder::new(config)?)),
        other => Err(CoreError::InvalidConfiguration(format!(
            "unknown embedding provider: {other}"
        ))),
    }
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

/// Send a request with exponential-backoff retry, returning the parsed JSON
/// body of the first successful response. Shared by the embedding and LLM
/// providers.
pub(crate) async fn send_with_retry(
    build: impl Fn() -> RequestBuilder,
    max_retries: u32,
    what: &str,
) -> Result<serde_json::Value, CoreError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json()
                        .await
                        .map_err(|e| CoreError::Provider(format!("{what}: bad response: {e}")));
                }

                let body_text = response.text().await.unwrap_or_default();

                // Rate limited or server error — retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(CoreError::Provider(format!(
                        "{what}: HTTP {status}: {body_text}"
                    )));
                    continue;
                }

                // Client error (not 429) — don't retry
                return Err(CoreError::Provider(format!(
                    "{what}: HTTP {status}: {body_text}"
                )));
            }
            Err(e) => {
                last_err = Some(CoreError::Provider(format!("{what}: {e}")));
                continue;
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| CoreError::Provider(format!("{what}: failed after retries"))))
}

fn check_batch_len(got: usize, expected: usize, what: &str) -> Result<(), CoreError> {
    if got != expected {
        return Err(CoreError::Provider(format!(
            "{what}: expected {expected} embeddings, got {got}"
        )));
    }
    Ok(())
}

// ============ OpenAI ============

pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    client: reqwest::Client,
    max_retries: u32,
    batch_size: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, CoreError> {
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            api_key: require_env("OPENAI_API_KEY")?,
            client: http_client(config.timeout_secs)?,
            max_retries: config.max_retries,
            batch_size: config.batch_size,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });

            let json = send_with_retry(
                || {
                    self.client
                        .post("https://api.openai.com/v1/embeddings")
                        .header("Authorization", format!("Bearer {}", self.api_key))
                        .json(&body)
                },
                self.max_retries,
                "OpenAI embeddings",
            )
            .await?;

            let data = json
                .get("data")
                .and_then(|d| d.as_array())
                .ok_or_else(|| {
                    CoreError::Provider("OpenAI embeddings: missing data array".into())
                })?;

            for item in data {
                let embedding = item
                    .get("embedding")
                    .and_then(|e| e.as_array())
                    .ok_or_else(|| {
                        CoreError::Provider("OpenAI embeddings: missing embedding".into())
                    })?;
                out.push(
                    embedding
                        .iter()
                        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                        .collect(),
                );
            }
        }

        check_batch_len(out.len(), texts.len(), "OpenAI embeddings")?;
        Ok(out)
    }
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, CoreError> {
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
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
impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let json = send_with_retry(
            || {
                self.client
                    .post(format!("{}/api/embed", self.url))
                    .json(&body)
            },
            self.max_retries,
            "Ollama embeddings",
        )
        .await?;

        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                CoreError::Provider("Ollama embeddings: missing embeddings array".into())
            })?;

        let mut out = Vec::with_capacity(embeddings.len());
        for embedding in embeddings {
            let vec: Vec<f32> = embedding
                .as_array()
                .ok_or_else(|| {
                    CoreError::Provider("Ollama embeddings: embedding is not an array".into())
                })?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            out.push(vec);
        }

        check_batch_len(out.len(), texts.len(), "Ollama embeddings")?;
        Ok(out)
    }
}

// ============ Gemini ============

pub struct GeminiEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    url: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl GeminiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, CoreError> {
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
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
impl EmbeddingProvider for GeminiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        let requests: Vec<serde_json::Value> = texts
            .iter()
            .map(|t| {
                serde_json::json!({
                    "model": format!("models/{}", self.model),
                    "content": { "parts": [ { "text": t } ] },
                })
            })
            .collect();
        let body = serde_json::json!({ "requests": requests });

        let endpoint = format!(
            "{}/models/{}:batchEmbedContents?key={}",
            self.url, self.model, self.api_key
        );

        let json = send_with_retry(
            || self.client.post(&endpoint).json(&body),
            self.max_retries,
            "Gemini embeddings",
        )
        .await?;

        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                CoreError::Provider("Gemini embeddings: missing embeddings array".into())
            })?;

        let mut out = Vec::with_capacity(embeddings.len());
        for embedding in embeddings {
            let values = embedding
                .get("values")
                .and_then(|v| v.as_array())
                .ok_or_else(|| {
                    CoreError::Provider("Gemini embeddings: missing values".into())
                })?;
            out.push(
                values
                    .iter()
                    .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                    .collect(),
            );
        }

        check_batch_len(out.len(), texts.len(), "Gemini embeddings")?;
        Ok(out)
    }
}
