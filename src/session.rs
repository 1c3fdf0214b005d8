//! Session lifecycle and the process-wide session registry.
//!
//! A session is the isolation boundary: it exclusively owns one
//! [`VectorIndex`] and one [`DocumentStore`], created lazily on first use
//! and dropped on explicit termination or idle expiry. Isolation is
//! structural — separate instances per session — so cross-session requests
//! never contend on a lock.
//!
//! Each session's state sits behind a `tokio::sync::RwLock`: mutating
//! operations (upload, delete) take the write guard, read-only operations
//! (query, list) the read guard. Embedding and LLM calls are awaited
//! *outside* these guards, so one session blocking on a provider never
//! stalls another.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::Config;
use crate::index::VectorIndex;
use crate::store::DocumentStore;

/// Mutable per-session state: the index/store pair the spec calls one
/// logical transaction unit.
pub struct SessionState {
    pub index: VectorIndex,
    pub store: DocumentStore,
}

struct SessionSlot {
    state: Arc<RwLock<SessionState>>,
    /// Unix timestamp of the last request touching this session.
    last_active: AtomicI64,
}

/// Process-wide map from session id to session state.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionSlot>>>,
    dims: usize,
    similarity_threshold: f32,
    max_documents: usize,
    idle_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(config: &Config) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            dims: config.embedding.dims,
            similarity_threshold: config.retrieval.similarity_threshold,
            max_documents: config.limits.max_files_per_session,
            idle_timeout: Duration::from_secs(config.session.idle_timeout_secs),
        }
    }

    /// Fetch a session's state, creating it on first use. Also refreshes
    /// the idle clock.
    pub async fn get_or_create(&self, session_id: &str) -> Arc<RwLock<SessionState>> {
        let now = Utc::now().timestamp();

        {
            let sessions = self.sessions.read().await;
            if let Some(slot) = sessions.get(session_id) {
                slot.last_active.store(now, Ordering::Relaxed);
                return slot.state.clone();
            }
        }

        let mut sessions = self.sessions.write().await;
        // Re-check: another request may have created it between the guards.
        let slot = sessions.entry(session_id.to_string()).or_insert_with(|| {
            debug!(session = session_id, "creating session");
            Arc::new(SessionSlot {
                state: Arc::new(RwLock::new(SessionState {
                    index: VectorIndex::new(self.dims, self.similarity_threshold),
                    store: DocumentStore::new(self.max_documents),
                })),
                last_active: AtomicI64::new(now),
            })
        });
        slot.last_active.store(now, Ordering::Relaxed);
        slot.state.clone()
    }

    /// Explicitly terminate a session, freeing its index and store.
    /// Returns `false` when the session was unknown.
    pub async fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop sessions idle past the configured timeout; returns how many
    /// were removed.
    pub async fn sweep_idle(&self) -> usize {
        let cutoff = Utc::now().timestamp() - self.idle_timeout.as_secs() as i64;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, slot| slot.last_active.load(Ordering::Relaxed) > cutoff);
        let swept = before - sessions.len();
        if swept > 0 {
            debug!(swept, "expired idle sessions");
        }
        swept
    }

    /// Background task that periodically sweeps idle sessions.
    pub fn start_sweeper(self: &Arc<Self>) {
        let registry = self.clone();
        let interval = registry.idle_timeout.min(Duration::from_secs(60)).max(Duration::from_secs(1));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                registry.sweep_idle().await;
            }
        });
    }
}
