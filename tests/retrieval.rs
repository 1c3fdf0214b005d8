//! End-to-end retrieval tests over the library pipeline, using a
//! deterministic in-process embedder so ranking is predictable without any
//! network backend.

use async_trait::async_trait;
use std::sync::Arc;

use docqa::config::{
    ChunkStrategy, ChunkingConfig, Config, DbConfig, EmbeddingConfig, LimitsConfig, LlmConfig,
    RetrievalConfig, ServerConfig, SessionConfig,
};
use docqa::embedding::EmbeddingProvider;
use docqa::error::CoreError;
use docqa::llm::{AnswerProvider, NO_ANSWER};
use docqa::persist::Persistence;
use docqa::pipeline::RetrievalPipeline;

const KEYWORDS: [&str; 3] = ["apple", "zebra", "mango"];

/// Each dimension counts occurrences of one keyword.
struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }
    fn dims(&self) -> usize {
        KEYWORDS.len()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        Ok(texts
            .iter()
            .map(|t| {
                KEYWORDS
                    .iter()
                    .map(|kw| t.matches(kw).count() as f32)
                    .collect()
            })
            .collect())
    }
}

/// Always fails, as a provider outage would.
struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing-test"
    }
    fn dims(&self) -> usize {
        KEYWORDS.len()
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        Err(CoreError::Provider("backend unavailable".into()))
    }
}

/// Reports the configured dimension but returns shorter vectors, so the
/// index insert itself fails after chunking succeeds.
struct WrongDimsEmbedder;

#[async_trait]
impl EmbeddingProvider for WrongDimsEmbedder {
    fn model_name(&self) -> &str {
        "wrong-dims-test"
    }
    fn dims(&self) -> usize {
        KEYWORDS.len()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        Ok(texts.iter().map(|_| vec![0.5; KEYWORDS.len() - 1]).collect())
    }
}

struct EchoLlm;

#[async_trait]
impl AnswerProvider for EchoLlm {
    fn model_name(&self) -> &str {
        "echo-test"
    }
    async fn answer(&self, _question: &str, context: &str) -> Result<String, CoreError> {
        Ok(format!("echo:{context}"))
    }
}

fn config() -> Config {
    Config {
        server: ServerConfig {
            bind: "127.0.0.1:0".into(),
        },
        db: None,
        chunking: ChunkingConfig {
            chunk_size: 2000,
            overlap: 200,
            strategy: ChunkStrategy::Fixed,
        },
        retrieval: RetrievalConfig {
            similarity_threshold: 0.01,
            max_results: 5,
            max_context_chars: 12_000,
        },
        embedding: EmbeddingConfig {
            provider: "ollama".into(),
            model: "keyword-test".into(),
            dims: KEYWORDS.len(),
            url: None,
            batch_size: 64,
            max_retries: 0,
            timeout_secs: 5,
        },
        llm: LlmConfig {
            provider: "ollama".into(),
            model: "echo-test".into(),
            url: None,
            max_retries: 0,
            timeout_secs: 5,
        },
        limits: LimitsConfig {
            max_files_per_session: 20,
            max_file_size_mb: 10,
            max_pages_per_file: 1000,
        },
        session: SessionConfig {
            idle_timeout_secs: 1800,
        },
    }
}

fn pipeline(db: Option<Arc<Persistence>>) -> RetrievalPipeline {
    RetrievalPipeline::new(config(), Arc::new(KeywordEmbedder), Arc::new(EchoLlm), db).unwrap()
}

/// A 5000-char ASCII document: apples up to 1900, zebras to 3600, mangoes
/// to the end. With `chunk_size=2000, overlap=200` the middle chunk is
/// zebra-dominant.
fn five_k_doc() -> String {
    let mut text = String::new();
    text.push_str(&"apple ".repeat(400)[..1900]);
    text.push_str(&"zebra ".repeat(400)[..1700]);
    text.push_str(&"mango ".repeat(400)[..1400]);
    assert_eq!(text.chars().count(), 5000);
    text
}

#[test]
fn fixed_chunking_of_5000_chars_yields_expected_offsets() {
    let spans = docqa::chunk::chunk_fixed(&five_k_doc(), 2000, 200);
    let offsets: Vec<(usize, usize)> = spans.iter().map(|s| (s.start, s.end)).collect();
    assert_eq!(offsets, vec![(0, 2000), (1800, 3800), (3600, 5000)]);
}

#[tokio::test]
async fn query_ranks_the_matching_chunk_first() {
    let pipeline = pipeline(None);
    let meta = pipeline
        .upload("s", "animals.txt", five_k_doc().as_bytes())
        .await
        .unwrap();
    assert_eq!(meta.chunk_count, 3);

    let outcome = pipeline.query("s", "zebra zebra").await.unwrap();
    assert!(!outcome.sources.is_empty());
    assert_eq!(outcome.sources[0].document_id, meta.id);
    assert_eq!(outcome.sources[0].seq, 1);
    assert!(outcome.answer.contains("zebra"));
}

#[tokio::test]
async fn deleting_a_document_removes_all_its_chunks_from_search() {
    let pipeline = pipeline(None);
    let meta = pipeline
        .upload("s", "animals.txt", five_k_doc().as_bytes())
        .await
        .unwrap();

    pipeline.delete_document("s", meta.id).await.unwrap();

    let outcome = pipeline.query("s", "zebra").await.unwrap();
    assert_eq!(outcome.answer, NO_ANSWER);
    assert!(outcome.sources.is_empty());
    assert!(pipeline.list_documents("s").await.is_empty());
}

#[tokio::test]
async fn uploads_in_one_session_are_invisible_to_another() {
    let pipeline = pipeline(None);
    pipeline
        .upload("session-a", "animals.txt", five_k_doc().as_bytes())
        .await
        .unwrap();

    assert!(pipeline.list_documents("session-b").await.is_empty());
    let outcome = pipeline.query("session-b", "zebra").await.unwrap();
    assert_eq!(outcome.answer, NO_ANSWER);

    // Session A is untouched by B's activity.
    assert_eq!(pipeline.list_documents("session-a").await.len(), 1);
}

#[tokio::test]
async fn quota_is_enforced_per_session() {
    let mut cfg = config();
    cfg.limits.max_files_per_session = 2;
    let pipeline =
        RetrievalPipeline::new(cfg, Arc::new(KeywordEmbedder), Arc::new(EchoLlm), None).unwrap();

    pipeline.upload("s", "one.txt", b"apple").await.unwrap();
    pipeline.upload("s", "two.txt", b"zebra").await.unwrap();
    let err = pipeline.upload("s", "three.txt", b"mango").await.unwrap_err();
    assert!(matches!(err, CoreError::QuotaExceeded { limit: 2 }));

    // Another session still has a free quota.
    pipeline.upload("other", "one.txt", b"apple").await.unwrap();
}

#[tokio::test]
async fn failed_embedding_leaves_no_partial_document() {
    let pipeline = RetrievalPipeline::new(
        config(),
        Arc::new(FailingEmbedder),
        Arc::new(EchoLlm),
        None,
    )
    .unwrap();

    let err = pipeline
        .upload("s", "animals.txt", five_k_doc().as_bytes())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Provider(_)));

    assert!(pipeline.list_documents("s").await.is_empty());
    let stats = pipeline.session_stats("s").await.unwrap();
    assert_eq!(stats.documents, 0);
    assert_eq!(stats.chunks, 0);
}

#[tokio::test]
async fn malformed_vectors_roll_back_the_registration() {
    let pipeline = RetrievalPipeline::new(
        config(),
        Arc::new(WrongDimsEmbedder),
        Arc::new(EchoLlm),
        None,
    )
    .unwrap();

    let err = pipeline
        .upload("s", "animals.txt", five_k_doc().as_bytes())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::DimensionMismatch { .. }));

    // The registration made before the insert failure is rolled back.
    assert!(pipeline.list_documents("s").await.is_empty());
    let stats = pipeline.session_stats("s").await.unwrap();
    assert_eq!(stats.documents, 0);
    assert_eq!(stats.chunks, 0);
}

#[tokio::test]
async fn query_log_survives_in_the_database() {
    let tmp = tempfile::TempDir::new().unwrap();
    let db = DbConfig {
        path: tmp.path().join("docqa.sqlite"),
    };
    let persistence = Persistence::connect(&db).await.unwrap();
    persistence.migrate().await.unwrap();
    let pipeline = pipeline(Some(Arc::new(persistence)));

    pipeline
        .upload("s", "animals.txt", five_k_doc().as_bytes())
        .await
        .unwrap();
    pipeline.query("s", "zebra").await.unwrap();
    pipeline.query("s", "mango").await.unwrap();

    let history = pipeline.chat_history("s").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].question, "zebra");

    let stats = pipeline.session_stats("s").await.unwrap();
    assert_eq!(stats.documents, 1);
    assert_eq!(stats.chunks, 3);
    assert_eq!(stats.queries, 2);

    assert_eq!(pipeline.clear_chat_history("s").await.unwrap(), 2);
    assert!(pipeline.chat_history("s").await.unwrap().is_empty());
}
