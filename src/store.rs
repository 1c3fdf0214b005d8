//! Per-session document metadata and chunk records.
//!
//! Maps monotonically assigned document ids to filenames, upload times, and
//! the ordered chunk records produced at upload. Backs listing, deletion,
//! and the chunk-text lookups the pipeline performs during context
//! assembly. Mutated only together with the session's
//! [`VectorIndex`](crate::index::VectorIndex), under the session lock.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::chunk::ChunkSpan;
use crate::error::CoreError;
use crate::models::{ChunkId, DocumentId};

/// Metadata surfaced by listing and per-document lookups.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentMeta {
    pub id: DocumentId,
    pub filename: String,
    pub upload_time: DateTime<Utc>,
    pub chunk_count: usize,
    pub size_bytes: usize,
    /// SHA-256 of the uploaded bytes, hex-encoded.
    pub content_hash: String,
}

/// A chunk as stored: identity plus the span it covers in the source.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: ChunkId,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

#[derive(Debug)]
struct DocumentRecord {
    meta: DocumentMeta,
    chunks: Vec<ChunkRecord>,
}

pub struct DocumentStore {
    max_documents: usize,
    next_id: DocumentId,
    docs: HashMap<DocumentId, DocumentRecord>,
}

impl DocumentStore {
    pub fn new(max_documents: usize) -> Self {
        Self {
            max_documents,
            next_id: 1,
            docs: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Register a newly uploaded document, assigning its id and the chunk
    /// ids `(id, 0..n)`. Fails with [`CoreError::QuotaExceeded`] at the
    /// per-session document limit, leaving no record behind.
    pub fn register(
        &mut self,
        filename: &str,
        size_bytes: usize,
        content_hash: &str,
        spans: &[ChunkSpan],
    ) -> Result<DocumentId, CoreError> {
        if self.docs.len() >= self.max_documents {
            return Err(CoreError::QuotaExceeded {
                limit: self.max_documents,
            });
        }

        let id = self.next_id;
        self.next_id += 1;

        let chunks: Vec<ChunkRecord> = spans
            .iter()
            .map(|span| ChunkRecord {
                id: ChunkId::new(id, span.seq),
                start: span.start,
                end: span.end,
                text: span.text.clone(),
            })
            .collect();

        self.docs.insert(
            id,
            DocumentRecord {
                meta: DocumentMeta {
                    id,
                    filename: filename.to_string(),
                    upload_time: Utc::now(),
                    chunk_count: chunks.len(),
                    size_bytes,
                    content_hash: content_hash.to_string(),
                },
                chunks,
            },
        );

        Ok(id)
    }

    /// All document records, ordered by upload time ascending (id breaks
    /// ties, so ordering is stable within one instant).
    pub fn list_metadata(&self) -> Vec<DocumentMeta> {
        let mut metas: Vec<DocumentMeta> = self.docs.values().map(|d| d.meta.clone()).collect();
        metas.sort_by(|a, b| a.upload_time.cmp(&b.upload_time).then(a.id.cmp(&b.id)));
        metas
    }

    pub fn get(&self, id: DocumentId) -> Result<&DocumentMeta, CoreError> {
        self.docs
            .get(&id)
            .map(|d| &d.meta)
            .ok_or_else(|| CoreError::NotFound(format!("document {id}")))
    }

    /// Ordered chunk ids of a document.
    pub fn get_chunk_ids(&self, id: DocumentId) -> Result<Vec<ChunkId>, CoreError> {
        self.docs
            .get(&id)
            .map(|d| d.chunks.iter().map(|c| c.id).collect())
            .ok_or_else(|| CoreError::NotFound(format!("document {id}")))
    }

    /// Look up a chunk record by id.
    pub fn chunk(&self, id: ChunkId) -> Result<&ChunkRecord, CoreError> {
        self.docs
            .get(&id.document)
            .and_then(|d| d.chunks.get(id.seq as usize))
            .filter(|c| c.id == id)
            .ok_or_else(|| CoreError::NotFound(format!("chunk {id}")))
    }

    /// Remove a document record, returning its metadata.
    pub fn remove(&mut self, id: DocumentId) -> Result<DocumentMeta, CoreError> {
        self.docs
            .remove(&id)
            .map(|d| d.meta)
            .ok_or_else(|| CoreError::NotFound(format!("document {id}")))
    }
}
