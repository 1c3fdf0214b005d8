//! Session-scoped document Q&A.
//!
//! Upload PDF, DOCX, or plain-text documents into an isolated session and
//! ask questions answered from their content. Documents are chunked with
//! overlap, embedded through a configurable provider, and indexed in a
//! per-session in-memory vector index; answers are synthesized by a chat
//! provider from the retrieved chunks.
//!
//! The library layers are usable directly:
//!
//! - [`chunk`], [`extract`] — pure text processing.
//! - [`embedding`], [`llm`] — provider capability traits and HTTP
//!   implementations (OpenAI, Ollama, Gemini).
//! - [`index`], [`store`], [`session`] — per-session retrieval state.
//! - [`pipeline`] — upload/query/delete orchestration.
//! - [`persist`], [`server`] — the optional SQLite mirror and the axum
//!   HTTP boundary used by the `docqa` binary.

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod llm;
pub mod models;
pub mod persist;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod store;
