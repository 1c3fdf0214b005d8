//! HTTP API for the document Q&A service.
//!
//! Thin axum boundary over [`RetrievalPipeline`]: handlers extract the
//! session id, call one pipeline operation, and map [`CoreError`] to an
//! HTTP status. No retrieval logic lives here.
//!
//! # Sessions
//!
//! The session id travels in the `x-session-id` request header. When the
//! header is absent a fresh UUID is minted and returned in the response
//! body, so a client's first upload implicitly opens its session.
//!
//! # Endpoints
//!
//! | Method   | Path | Description |
//! |----------|------|-------------|
//! | `POST`   | `/api/upload` | Multipart upload; per-file accept/reject |
//! | `POST`   | `/api/query` | Answer a question from the session's documents |
//! | `GET`    | `/api/documents` | List the session's documents |
//! | `DELETE` | `/api/documents/{id}` | Remove one document and its vectors |
//! | `GET`    | `/api/chat-history` | Past question/answer pairs |
//! | `DELETE` | `/api/chat-history` | Clear the session's history |
//! | `GET`    | `/api/chat-history/export` | Plain-text history export |
//! | `GET`    | `/api/stats` | Session usage counters |
//! | `DELETE` | `/api/session` | Terminate the session |
//! | `GET`    | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `quota_exceeded` (400), `not_found`
//! (404), `extraction_failed` (422), `provider_error` (502), `internal`
//! (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::error::CoreError;
use crate::persist::Persistence;
use crate::pipeline::{QueryOutcome, RetrievalPipeline, SessionStats};
use crate::store::DocumentMeta;

const SESSION_HEADER: &str = "x-session-id";

#[derive(Clone)]
struct AppState {
    pipeline: Arc<RetrievalPipeline>,
}

/// Build providers and persistence from the configuration, then serve
/// until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let embedder = crate::embedding::create_provider(&config.embedding)?;
    let llm = crate::llm::create_provider(&config.llm)?;

    let persistence = match &config.db {
        Some(db) => {
            let persistence = Persistence::connect(db).await?;
            persistence.migrate().await?;
            Some(Arc::new(persistence))
        }
        None => None,
    };

    let pipeline = Arc::new(RetrievalPipeline::new(
        config.clone(),
        embedder,
        llm,
        persistence,
    )?);
    pipeline.sessions().start_sweeper();

    let bind_addr = config.server.bind.clone();
    // One request may carry a whole batch of files, plus multipart framing.
    let max_body = config.max_file_size_bytes() * config.limits.max_files_per_session + 1024 * 1024;
    let app = router(pipeline, max_body);

    info!(addr = %bind_addr, "listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(pipeline: Arc<RetrievalPipeline>, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/upload", post(handle_upload))
        .route("/api/query", post(handle_query))
        .route("/api/documents", get(handle_list_documents))
        .route("/api/documents/{id}", delete(handle_delete_document))
        .route(
            "/api/chat-history",
            get(handle_chat_history).delete(handle_clear_chat_history),
        )
        .route("/api/chat-history/export", get(handle_export_chat_history))
        .route("/api/stats", get(handle_stats))
        .route("/api/session", delete(handle_end_session))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .with_state(AppState { pipeline })
}

/// Session id from the request header, or a freshly minted one.
fn session_id(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err {
            CoreError::Validation(_) => bad_request(message),
            CoreError::QuotaExceeded { .. } => AppError {
                status: StatusCode::BAD_REQUEST,
                code: "quota_exceeded",
                message,
            },
            CoreError::NotFound(_) => not_found(message),
            CoreError::Extraction(_) => AppError {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                code: "extraction_failed",
                message,
            },
            CoreError::Provider(_) => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "provider_error",
                message,
            },
            CoreError::DimensionMismatch { .. } | CoreError::InvalidConfiguration(_) => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal",
                message,
            },
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/upload ============

#[derive(Serialize)]
struct UploadResponse {
    session_id: String,
    files: Vec<FileStatus>,
}

/// Per-file outcome: a rejected file never fails the batch.
#[derive(Serialize)]
struct FileStatus {
    filename: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    document: Option<DocumentMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn handle_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let session = session_id(&headers);
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("malformed multipart body: {e}")))?
    {
        let filename = match field.file_name() {
            Some(name) => name.to_string(),
            None => continue, // non-file form fields are ignored
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read {filename}: {e}")))?;

        match state.pipeline.upload(&session, &filename, &bytes).await {
            Ok(meta) => files.push(FileStatus {
                filename,
                status: "indexed",
                document: Some(meta),
                error: None,
            }),
            Err(err) => files.push(FileStatus {
                filename,
                status: "rejected",
                document: None,
                error: Some(err.to_string()),
            }),
        }
    }

    if files.is_empty() {
        return Err(bad_request("no files in upload"));
    }

    Ok(Json(UploadResponse {
        session_id: session,
        files,
    }))
}

// ============ POST /api/query ============

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
}

#[derive(Serialize)]
struct QueryResponse {
    session_id: String,
    #[serde(flatten)]
    outcome: QueryOutcome,
}

async fn handle_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let session = session_id(&headers);
    let outcome = state.pipeline.query(&session, &request.question).await?;
    Ok(Json(QueryResponse {
        session_id: session,
        outcome,
    }))
}

// ============ Documents ============

#[derive(Serialize)]
struct DocumentListResponse {
    session_id: String,
    documents: Vec<DocumentMeta>,
}

async fn handle_list_documents(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<DocumentListResponse> {
    let session = session_id(&headers);
    let documents = state.pipeline.list_documents(&session).await;
    Json(DocumentListResponse {
        session_id: session,
        documents,
    })
}

async fn handle_delete_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Result<Json<DocumentMeta>, AppError> {
    let session = session_id(&headers);
    let meta = state.pipeline.delete_document(&session, id).await?;
    Ok(Json(meta))
}

// ============ Chat history ============

#[derive(Serialize)]
struct ChatHistoryResponse {
    session_id: String,
    entries: Vec<crate::persist::ChatEntry>,
}

async fn handle_chat_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ChatHistoryResponse>, AppError> {
    let session = session_id(&headers);
    let entries = state.pipeline.chat_history(&session).await?;
    Ok(Json(ChatHistoryResponse {
        session_id: session,
        entries,
    }))
}

#[derive(Serialize)]
struct ClearHistoryResponse {
    session_id: String,
    deleted: u64,
}

async fn handle_clear_chat_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ClearHistoryResponse>, AppError> {
    let session = session_id(&headers);
    let deleted = state.pipeline.clear_chat_history(&session).await?;
    Ok(Json(ClearHistoryResponse {
        session_id: session,
        deleted,
    }))
}

async fn handle_export_chat_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let session = session_id(&headers);
    let entries = state.pipeline.chat_history(&session).await?;
    let body = format_history_export(&session, &entries);
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response())
}

/// Plain-text export: a header line, then one Q/A block per entry.
fn format_history_export(session: &str, entries: &[crate::persist::ChatEntry]) -> String {
    let mut out = format!("Chat history for session {session}\n\n");
    for entry in entries {
        out.push_str(&format!(
            "[{}]\nQ: {}\nA: {}\n\n",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            entry.question,
            entry.answer
        ));
    }
    out
}

// ============ Stats and session lifecycle ============

#[derive(Serialize)]
struct StatsResponse {
    session_id: String,
    #[serde(flatten)]
    stats: SessionStats,
}

async fn handle_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StatsResponse>, AppError> {
    let session = session_id(&headers);
    let stats = state.pipeline.session_stats(&session).await?;
    Ok(Json(StatsResponse {
        session_id: session,
        stats,
    }))
}

#[derive(Serialize)]
struct EndSessionResponse {
    session_id: String,
    ended: bool,
}

async fn handle_end_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<EndSessionResponse>, AppError> {
    let session = session_id(&headers);
    if !state.pipeline.end_session(&session).await {
        return Err(not_found(format!("session {session}")));
    }
    Ok(Json(EndSessionResponse {
        session_id: session,
        ended: true,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn session_id_prefers_header_and_mints_otherwise() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, "abc-123".parse().unwrap());
        assert_eq!(session_id(&headers), "abc-123");

        let minted = session_id(&HeaderMap::new());
        assert!(uuid::Uuid::parse_str(&minted).is_ok());

        // Blank headers are treated as absent.
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, "   ".parse().unwrap());
        assert_ne!(session_id(&headers), "   ");
    }

    #[test]
    fn core_errors_map_to_documented_statuses() {
        let cases = [
            (CoreError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (
                CoreError::QuotaExceeded { limit: 20 },
                StatusCode::BAD_REQUEST,
            ),
            (CoreError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                CoreError::Extraction("x".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (CoreError::Provider("x".into()), StatusCode::BAD_GATEWAY),
            (
                CoreError::DimensionMismatch {
                    expected: 4,
                    got: 3,
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn history_export_contains_each_exchange() {
        let entries = vec![crate::persist::ChatEntry {
            id: 1,
            question: "what is alpha?".into(),
            answer: "a subsystem".into(),
            timestamp: Utc::now(),
        }];
        let text = format_history_export("s1", &entries);
        assert!(text.starts_with("Chat history for session s1"));
        assert!(text.contains("Q: what is alpha?"));
        assert!(text.contains("A: a subsystem"));
    }
}
