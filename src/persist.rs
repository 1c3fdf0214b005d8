//! Optional SQLite persistence for document metadata and the query log.
//!
//! The authoritative retrieval state is the in-memory per-session index and
//! store; this module mirrors document metadata and records every
//! question/answer pair so chat history and session stats survive beyond a
//! single response. Configured via `[db]`; when the section is absent the
//! pipeline runs fully in memory.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;

use crate::config::DbConfig;
use crate::models::DocumentId;

/// One recorded question/answer exchange.
#[derive(Debug, Clone, Serialize)]
pub struct ChatEntry {
    pub id: i64,
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}

pub struct Persistence {
    pool: SqlitePool,
}

impl Persistence {
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Create the schema. Idempotent.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                session_id TEXT NOT NULL,
                document_id INTEGER NOT NULL,
                filename TEXT NOT NULL,
                upload_time INTEGER NOT NULL,
                chunk_count INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                PRIMARY KEY (session_id, document_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS query_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                question TEXT NOT NULL,
                response TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_query_logs_session ON query_logs(session_id, timestamp)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn record_document(
        &self,
        session_id: &str,
        document_id: DocumentId,
        filename: &str,
        upload_time: DateTime<Utc>,
        chunk_count: usize,
        size_bytes: usize,
        content_hash: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (session_id, document_id, filename, upload_time, chunk_count, size_bytes, content_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id, document_id) DO UPDATE SET
                filename = excluded.filename,
                upload_time = excluded.upload_time,
                chunk_count = excluded.chunk_count,
                size_bytes = excluded.size_bytes,
                content_hash = excluded.content_hash
            "#,
        )
        .bind(session_id)
        .bind(document_id as i64)
        .bind(filename)
        .bind(upload_time.timestamp())
        .bind(chunk_count as i64)
        .bind(size_bytes as i64)
        .bind(content_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_document(&self, session_id: &str, document_id: DocumentId) -> Result<()> {
        sqlx::query("DELETE FROM documents WHERE session_id = ? AND document_id = ?")
            .bind(session_id)
            .bind(document_id as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn log_query(&self, session_id: &str, question: &str, answer: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO query_logs (session_id, question, response, timestamp) VALUES (?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(question)
        .bind(answer)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Chat history for a session, oldest first.
    pub async fn chat_history(&self, session_id: &str) -> Result<Vec<ChatEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, question, response, timestamp
            FROM query_logs
            WHERE session_id = ?
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ChatEntry {
                id: row.get("id"),
                question: row.get("question"),
                answer: row.get("response"),
                timestamp: DateTime::from_timestamp(row.get("timestamp"), 0)
                    .unwrap_or_else(Utc::now),
            })
            .collect())
    }

    /// Delete a session's chat history, returning the number of rows
    /// removed.
    pub async fn clear_chat_history(&self, session_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM query_logs WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn query_count(&self, session_id: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM query_logs WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
