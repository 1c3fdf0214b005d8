//! Core identifiers shared across the retrieval pipeline.

use serde::Serialize;

/// Session-scoped document identifier, assigned monotonically by the
/// [`DocumentStore`](crate::store::DocumentStore).
pub type DocumentId = u64;

/// Identity of a chunk: owning document plus position within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ChunkId {
    pub document: DocumentId,
    pub seq: u32,
}

impl ChunkId {
    pub fn new(document: DocumentId, seq: u32) -> Self {
        Self { document, seq }
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.document, self.seq)
    }
}
