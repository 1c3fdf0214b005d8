use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::CoreError;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub db: Option<DbConfig>,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Chunk boundary strategy: a hard fixed-size walk, or the recursive
/// variant that prefers paragraph/sentence breaks near the target size.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    Fixed,
    Recursive,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_strategy")]
    pub strategy: ChunkStrategy,
}

fn default_overlap() -> usize {
    200
}
fn default_strategy() -> ChunkStrategy {
    ChunkStrategy::Recursive
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            max_results: default_max_results(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_similarity_threshold() -> f32 {
    0.0
}
fn default_max_results() -> usize {
    5
}
fn default_max_context_chars() -> usize {
    12_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub dims: usize,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_max_files")]
    pub max_files_per_session: usize,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages_per_file: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_files_per_session: default_max_files(),
            max_file_size_mb: default_max_file_size_mb(),
            max_pages_per_file: default_max_pages(),
        }
    }
}

fn default_max_files() -> usize {
    20
}
fn default_max_file_size_mb() -> usize {
    10
}
fn default_max_pages() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

fn default_idle_timeout_secs() -> u64 {
    1800
}

const KNOWN_PROVIDERS: &[&str] = &["openai", "ollama", "gemini"];

impl Config {
    /// Validate the cross-field invariants serde defaults cannot express.
    /// Violations are fatal at startup.
    pub fn validate(&self) -> std::result::Result<(), CoreError> {
        if self.chunking.chunk_size == 0 {
            return Err(CoreError::InvalidConfiguration(
                "chunking.chunk_size must be > 0".into(),
            ));
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            return Err(CoreError::InvalidConfiguration(format!(
                "chunking.overlap ({}) must be < chunking.chunk_size ({})",
                self.chunking.overlap, self.chunking.chunk_size
            )));
        }
        if self.embedding.dims == 0 {
            return Err(CoreError::InvalidConfiguration(
                "embedding.dims must be > 0".into(),
            ));
        }
        if self.retrieval.max_results == 0 {
            return Err(CoreError::InvalidConfiguration(
                "retrieval.max_results must be >= 1".into(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.retrieval.similarity_threshold) {
            return Err(CoreError::InvalidConfiguration(
                "retrieval.similarity_threshold must be in [-1.0, 1.0]".into(),
            ));
        }
        if !KNOWN_PROVIDERS.contains(&self.embedding.provider.as_str()) {
            return Err(CoreError::InvalidConfiguration(format!(
                "unknown embedding provider '{}'. Must be one of: openai, ollama, gemini",
                self.embedding.provider
            )));
        }
        if !KNOWN_PROVIDERS.contains(&self.llm.provider.as_str()) {
            return Err(CoreError::InvalidConfiguration(format!(
                "unknown llm provider '{}'. Must be one of: openai, ollama, gemini",
                self.llm.provider
            )));
        }
        Ok(())
    }

    pub fn max_file_size_bytes(&self) -> usize {
        self.limits.max_file_size_mb * 1024 * 1024
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(chunking: &str) -> String {
        format!(
            r#"
[server]
bind = "127.0.0.1:8080"

{chunking}

[embedding]
provider = "ollama"
model = "nomic-embed-text"
dims = 768

[llm]
provider = "ollama"
model = "llama3"
"#
        )
    }

    #[test]
    fn parses_minimal_config() {
        let toml_src = base_config("[chunking]\nchunk_size = 2000");
        let config: Config = toml::from_str(&toml_src).unwrap();
        config.validate().unwrap();
        assert_eq!(config.chunking.chunk_size, 2000);
        assert_eq!(config.chunking.overlap, 200);
        assert_eq!(config.chunking.strategy, ChunkStrategy::Recursive);
        assert_eq!(config.retrieval.max_results, 5);
        assert_eq!(config.limits.max_files_per_session, 20);
        assert!(config.db.is_none());
    }

    #[test]
    fn rejects_overlap_not_less_than_chunk_size() {
        let toml_src = base_config("[chunking]\nchunk_size = 100\noverlap = 100");
        let config: Config = toml::from_str(&toml_src).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfiguration(_)));
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let toml_src = base_config("[chunking]\nchunk_size = 0");
        let config: Config = toml::from_str(&toml_src).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_provider() {
        let toml_src = base_config("[chunking]\nchunk_size = 2000")
            .replacen("provider = \"ollama\"", "provider = \"acme\"", 1);
        let config: Config = toml::from_str(&toml_src).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("embedding provider"));
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let toml_src = base_config(
            "[chunking]\nchunk_size = 2000\n\n[retrieval]\nsimilarity_threshold = 1.5",
        );
        let config: Config = toml::from_str(&toml_src).unwrap();
        assert!(config.validate().is_err());
    }
}
