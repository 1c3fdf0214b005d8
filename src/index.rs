//! Per-session nearest-neighbor index over embedded chunks.
//!
//! Brute-force cosine similarity over an arena of vector entries. Deletions
//! tombstone entries in a parallel live/dead bitmap; the arena is compacted
//! once dead entries outnumber live ones. Compaction never changes search
//! results for live entries.
//!
//! The index itself is a plain single-threaded structure; the session layer
//! wraps it in a per-session `RwLock`, which is what makes
//! `remove_by_document` atomic with respect to in-flight searches — a
//! reader holds the read guard for the whole search and sees either the
//! pre- or the fully-post-mutation state.
//!
//! Scores are raw cosine similarity in `[-1, 1]`: meaningful for ranking,
//! not as probabilities.

use crate::error::CoreError;
use crate::models::{ChunkId, DocumentId};

/// One embedded chunk inside the index.
#[derive(Debug, Clone)]
struct VectorEntry {
    chunk_id: ChunkId,
    document_id: DocumentId,
    vector: Vec<f32>,
}

/// A scored search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub score: f32,
}

pub struct VectorIndex {
    dims: usize,
    similarity_threshold: f32,
    entries: Vec<VectorEntry>,
    /// Parallel to `entries`; `true` marks a tombstoned slot.
    dead: Vec<bool>,
    dead_count: usize,
}

impl VectorIndex {
    pub fn new(dims: usize, similarity_threshold: f32) -> Self {
        Self {
            dims,
            similarity_threshold,
            entries: Vec::new(),
            dead: Vec::new(),
            dead_count: 0,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len() - self.dead_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a batch of entries. All dimensions are checked before any
    /// entry is stored, so a failed insert changes nothing.
    pub fn insert(
        &mut self,
        entries: Vec<(ChunkId, Vec<f32>, DocumentId)>,
    ) -> Result<(), CoreError> {
        for (_, vector, _) in &entries {
            if vector.len() != self.dims {
                return Err(CoreError::DimensionMismatch {
                    expected: self.dims,
                    got: vector.len(),
                });
            }
        }

        for (chunk_id, vector, document_id) in entries {
            self.entries.push(VectorEntry {
                chunk_id,
                document_id,
                vector,
            });
            self.dead.push(false);
        }

        Ok(())
    }

    /// Top-k cosine similarity search, descending. Entries below the
    /// configured threshold are excluded even when fewer than `k` remain.
    /// An empty index yields an empty result, not an error.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, CoreError> {
        if query.len() != self.dims {
            return Err(CoreError::DimensionMismatch {
                expected: self.dims,
                got: query.len(),
            });
        }

        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .zip(self.dead.iter())
            .filter(|(_, dead)| !**dead)
            .map(|(entry, _)| SearchHit {
                chunk_id: entry.chunk_id,
                document_id: entry.document_id,
                score: cosine_similarity(query, &entry.vector),
            })
            .filter(|hit| hit.score >= self.similarity_threshold)
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);

        Ok(hits)
    }

    /// Tombstone every entry belonging to `document_id`, returning the
    /// number removed. Compacts when dead slots outnumber live ones.
    pub fn remove_by_document(&mut self, document_id: DocumentId) -> usize {
        let mut removed = 0usize;
        for (entry, dead) in self.entries.iter().zip(self.dead.iter_mut()) {
            if !*dead && entry.document_id == document_id {
                *dead = true;
                removed += 1;
            }
        }
        self.dead_count += removed;

        if self.dead_count > self.entries.len() / 2 {
            self.compact();
        }

        removed
    }

    /// Physically reclaim tombstoned storage. Preserves the relative order
    /// and chunk-id correspondence of live entries.
    pub fn compact(&mut self) {
        if self.dead_count == 0 {
            return;
        }
        let dead = std::mem::take(&mut self.dead);
        let mut kept = Vec::with_capacity(self.entries.len() - self.dead_count);
        for (entry, is_dead) in std::mem::take(&mut self.entries).into_iter().zip(dead) {
            if !is_dead {
                kept.push(entry);
            }
        }
        self.dead = vec![false; kept.len()];
        self.entries = kept;
        self.dead_count = 0;
    }
}

/// Cosine similarity between two equal-length vectors.
///
/// Returns `0.0` for empty or mismatched inputs and for zero-magnitude
/// vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
