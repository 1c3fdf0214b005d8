//! The retrieval pipeline: upload, query, delete, list.
//!
//! Orchestrates extraction, chunking, embedding, indexing, and answer
//! synthesis over per-session state. Provider calls are awaited outside the
//! session lock; the lock is taken only for the in-memory mutation or
//! search, so a slow embedding backend never serializes unrelated sessions.
//!
//! Upload is all-or-nothing per file: a failure at any stage leaves the
//! session's index and store unchanged.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::CoreError;
use crate::extract::{extract_text, FileKind};
use crate::llm::{AnswerProvider, NO_ANSWER};
use crate::models::DocumentId;
use crate::persist::{ChatEntry, Persistence};
use crate::session::SessionRegistry;
use crate::store::DocumentMeta;

/// A retrieved chunk reference returned alongside the answer.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub document_id: DocumentId,
    pub filename: String,
    pub seq: u32,
    pub score: f32,
    pub start: usize,
    pub end: usize,
}

/// Result of answering one question.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub answer: String,
    pub sources: Vec<RetrievedChunk>,
}

/// Per-session usage counters.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub documents: usize,
    pub chunks: usize,
    pub queries: i64,
}

pub struct RetrievalPipeline {
    config: Config,
    sessions: Arc<SessionRegistry>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn AnswerProvider>,
    persistence: Option<Arc<Persistence>>,
}

impl RetrievalPipeline {
    pub fn new(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn AnswerProvider>,
        persistence: Option<Arc<Persistence>>,
    ) -> Result<Self, CoreError> {
        if embedder.dims() != config.embedding.dims {
            return Err(CoreError::InvalidConfiguration(format!(
                "embedding provider reports {} dims, config says {}",
                embedder.dims(),
                config.embedding.dims
            )));
        }

        Ok(Self {
            sessions: Arc::new(SessionRegistry::new(&config)),
            config,
            embedder,
            llm,
            persistence,
        })
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Ingest one uploaded file into a session.
    ///
    /// Validates type and size, extracts text, chunks it, embeds the chunks,
    /// then registers document and vectors atomically under the session
    /// write lock.
    pub async fn upload(
        &self,
        session_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<DocumentMeta, CoreError> {
        let kind = FileKind::from_filename(filename).ok_or_else(|| {
            CoreError::Validation(format!(
                "unsupported file type: {filename} (allowed: pdf, txt, doc, docx)"
            ))
        })?;

        let max_bytes = self.config.max_file_size_bytes();
        if bytes.len() > max_bytes {
            return Err(CoreError::Validation(format!(
                "file {filename} is {} bytes, limit is {max_bytes}",
                bytes.len()
            )));
        }

        let text = extract_text(bytes, kind, self.config.limits.max_pages_per_file)?;
        if text.trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "no extractable text in {filename}"
            )));
        }

        let spans = chunk_text(&text, &self.config.chunking);
        if spans.is_empty() {
            return Err(CoreError::Validation(format!(
                "no chunks produced from {filename}"
            )));
        }

        // Embed before taking the session lock.
        let texts: Vec<String> = spans.iter().map(|s| s.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let content_hash = format!("{:x}", Sha256::digest(bytes));

        let state = self.sessions.get_or_create(session_id).await;
        let meta = {
            let mut state = state.write().await;
            let doc_id = state
                .store
                .register(filename, bytes.len(), &content_hash, &spans)?;

            let entries = spans
                .iter()
                .zip(vectors)
                .map(|(span, vector)| {
                    (
                        crate::models::ChunkId::new(doc_id, span.seq),
                        vector,
                        doc_id,
                    )
                })
                .collect();

            if let Err(err) = state.index.insert(entries) {
                // Roll back the registration so the failed upload leaves no
                // trace.
                let _ = state.store.remove(doc_id);
                return Err(err);
            }

            state.store.get(doc_id)?.clone()
        };

        info!(
            session = session_id,
            document = meta.id,
            filename,
            chunks = meta.chunk_count,
            "document indexed"
        );

        if let Some(persistence) = &self.persistence {
            if let Err(err) = persistence
                .record_document(
                    session_id,
                    meta.id,
                    filename,
                    meta.upload_time,
                    meta.chunk_count,
                    meta.size_bytes,
                    &meta.content_hash,
                )
                .await
            {
                warn!(error = %err, "failed to mirror document metadata");
            }
        }

        Ok(meta)
    }

    /// Answer a question against the session's documents.
    ///
    /// When nothing clears the similarity threshold the fixed
    /// [`NO_ANSWER`] string is returned without calling the LLM.
    pub async fn query(&self, session_id: &str, question: &str) -> Result<QueryOutcome, CoreError> {
        if question.trim().is_empty() {
            return Err(CoreError::Validation("question must not be empty".into()));
        }

        let query_vectors = self.embedder.embed(&[question.to_string()]).await?;
        let query_vector = query_vectors
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::Provider("embedding returned no vector".into()))?;

        let state = self.sessions.get_or_create(session_id).await;
        let retrieved: Vec<(RetrievedChunk, String)> = {
            let state = state.read().await;
            let hits = state
                .index
                .search(&query_vector, self.config.retrieval.max_results)?;

            let mut retrieved = Vec::with_capacity(hits.len());
            for hit in hits {
                let chunk = state.store.chunk(hit.chunk_id)?;
                let meta = state.store.get(hit.document_id)?;
                retrieved.push((
                    RetrievedChunk {
                        document_id: hit.document_id,
                        filename: meta.filename.clone(),
                        seq: hit.chunk_id.seq,
                        score: hit.score,
                        start: chunk.start,
                        end: chunk.end,
                    },
                    chunk.text.clone(),
                ));
            }
            retrieved
        };

        let outcome = if retrieved.is_empty() {
            debug!(session = session_id, "no chunks above threshold");
            QueryOutcome {
                answer: NO_ANSWER.to_string(),
                sources: Vec::new(),
            }
        } else {
            let (sources, context) =
                assemble_context(retrieved, self.config.retrieval.max_context_chars);
            let answer = self.llm.answer(question, &context).await?;
            QueryOutcome { answer, sources }
        };

        if let Some(persistence) = &self.persistence {
            if let Err(err) = persistence
                .log_query(session_id, question, &outcome.answer)
                .await
            {
                warn!(error = %err, "failed to log query");
            }
        }

        Ok(outcome)
    }

    /// Remove a document and its vectors from the session.
    pub async fn delete_document(
        &self,
        session_id: &str,
        document_id: DocumentId,
    ) -> Result<DocumentMeta, CoreError> {
        let state = self.sessions.get_or_create(session_id).await;
        let meta = {
            let mut state = state.write().await;
            let meta = state.store.remove(document_id)?;
            state.index.remove_by_document(document_id);
            meta
        };

        info!(session = session_id, document = document_id, "document removed");

        if let Some(persistence) = &self.persistence {
            if let Err(err) = persistence.delete_document(session_id, document_id).await {
                warn!(error = %err, "failed to mirror document deletion");
            }
        }

        Ok(meta)
    }

    /// List the session's documents, oldest upload first.
    pub async fn list_documents(&self, session_id: &str) -> Vec<DocumentMeta> {
        let state = self.sessions.get_or_create(session_id).await;
        let state = state.read().await;
        state.store.list_metadata()
    }

    pub async fn session_stats(&self, session_id: &str) -> Result<SessionStats, CoreError> {
        let state = self.sessions.get_or_create(session_id).await;
        let (documents, chunks) = {
            let state = state.read().await;
            (state.store.len(), state.index.len())
        };

        let queries = match &self.persistence {
            Some(persistence) => persistence
                .query_count(session_id)
                .await
                .map_err(|e| CoreError::Provider(format!("query count failed: {e}")))?,
            None => 0,
        };

        Ok(SessionStats {
            documents,
            chunks,
            queries,
        })
    }

    /// Chat history for a session, oldest first. Empty without persistence.
    pub async fn chat_history(&self, session_id: &str) -> Result<Vec<ChatEntry>, CoreError> {
        match &self.persistence {
            Some(persistence) => persistence
                .chat_history(session_id)
                .await
                .map_err(|e| CoreError::Provider(format!("chat history failed: {e}"))),
            None => Ok(Vec::new()),
        }
    }

    /// Delete a session's chat history, returning the number of entries
    /// removed.
    pub async fn clear_chat_history(&self, session_id: &str) -> Result<u64, CoreError> {
        match &self.persistence {
            Some(persistence) => persistence
                .clear_chat_history(session_id)
                .await
                .map_err(|e| CoreError::Provider(format!("clear history failed: {e}"))),
            None => Ok(0),
        }
    }

    /// Terminate a session, dropping its index and store.
    pub async fn end_session(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).await
    }
}

/// Build the LLM context from retrieved chunks, best score first.
///
/// Chunks whose span overlaps an already-included chunk of the same
/// document are skipped (the overlap region would repeat). Once a chunk
/// would exceed the character budget, it and everything ranked below it is
/// dropped, so the context is a prefix of the deduplicated ranking. The top
/// hit is always included even when it alone exceeds the budget.
fn assemble_context(
    retrieved: Vec<(RetrievedChunk, String)>,
    max_context_chars: usize,
) -> (Vec<RetrievedChunk>, String) {
    let mut sources: Vec<RetrievedChunk> = Vec::new();
    let mut parts: Vec<String> = Vec::new();
    let mut used = 0usize;

    for (chunk, text) in retrieved {
        let overlaps = sources.iter().any(|s| {
            s.document_id == chunk.document_id && s.start < chunk.end && chunk.start < s.end
        });
        if overlaps {
            continue;
        }

        let len = text.chars().count();
        if !sources.is_empty() && used + len > max_context_chars {
            break;
        }

        used += len;
        sources.push(chunk);
        parts.push(text);
    }

    (sources, parts.join("\n\n"))
}
