use async_trait::async_trait;
use log::{ debug, info };
use sqlx::sqlite::{ SqliteConnectOptions, SqlitePool, SqlitePoolOptions };
use std::str::FromStr;
use std::time::Duration;
use crate::models::chat::HistoryEntry;
use super::{ HistoryStore, StoreError };

const SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS conversations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        user_input TEXT NOT NULL,
        ai_response TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    )",
    "CREATE TABLE IF NOT EXISTS feedback (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT,
        query TEXT NOT NULL,
        response TEXT NOT NULL,
        helpful BOOLEAN NOT NULL,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    )",
    "CREATE INDEX IF NOT EXISTS idx_conversations_session ON conversations(session_id)",
    "CREATE INDEX IF NOT EXISTS idx_feedback_session ON feedback(session_id)",
];

/// Single-file embedded store. There is no connection to lose, so every error it
/// reports is non-transient and the retry envelope passes straight through.
pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

fn query_error(e: sqlx::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

impl SqliteHistoryStore {
    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration
    ) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Config(format!("Invalid SQLite URL '{}': {}", url, e)))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(acquire_timeout)
            .connect_with(options).await
            .map_err(query_error)?;
        info!("Opened SQLite history store at {}", url);
        Ok(Self { pool })
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn init_schema(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *tx).await.map_err(query_error)?;
        }
        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn log_conversation(
        &self,
        session_id: &str,
        user_input: &str,
        ai_response: &str
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;
        sqlx::query(
            "INSERT INTO conversations (session_id, user_input, ai_response) VALUES (?1, ?2, ?3)"
        )
            .bind(session_id)
            .bind(user_input)
            .bind(ai_response)
            .execute(&mut *tx).await
            .map_err(query_error)?;
        tx.commit().await.map_err(query_error)?;
        debug!("Logged conversation turn for session {}", session_id);
        Ok(())
    }

    async fn log_feedback(
        &self,
        session_id: Option<&str>,
        query: &str,
        response: &str,
        helpful: bool
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;
        sqlx::query(
            "INSERT INTO feedback (session_id, query, response, helpful) VALUES (?1, ?2, ?3, ?4)"
        )
            .bind(session_id)
            .bind(query)
            .bind(response)
            .bind(helpful)
            .execute(&mut *tx).await
            .map_err(query_error)?;
        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn get_history(
        &self,
        session_id: &str,
        limit: usize
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(query_error)?;
        sqlx::query_as::<_, HistoryEntry>(
            "SELECT user_input, ai_response, created_at
             FROM conversations
             WHERE session_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2"
        )
            .bind(session_id)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&mut *conn).await
            .map_err(query_error)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
