use async_trait::async_trait;
use log::{ debug, info };
use sqlx::postgres::{ PgPool, PgPoolOptions };
use std::time::Duration;
use crate::models::chat::HistoryEntry;
use super::{ HistoryStore, StoreError };

const SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS conversations (
        id BIGSERIAL PRIMARY KEY,
        session_id TEXT NOT NULL,
        user_input TEXT NOT NULL,
        ai_response TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE TABLE IF NOT EXISTS feedback (
        id BIGSERIAL PRIMARY KEY,
        session_id TEXT,
        query TEXT NOT NULL,
        response TEXT NOT NULL,
        helpful BOOLEAN NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE INDEX IF NOT EXISTS idx_conversations_session ON conversations(session_id)",
    "CREATE INDEX IF NOT EXISTS idx_feedback_session ON feedback(session_id)",
];

/// SQLSTATEs that describe a lost or refused connection rather than bad data.
fn is_connection_sqlstate(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "53300" | "57P01" | "57P02" | "57P03")
}

pub(crate) fn classify(e: sqlx::Error) -> StoreError {
    let transient = match &e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db.code().map_or(false, |code| is_connection_sqlstate(&code)),
        _ => false,
    };
    if transient {
        StoreError::Transient(e.to_string())
    } else {
        StoreError::Query(e.to_string())
    }
}

/// Networked store. The pool connects lazily, so an unreachable server shows up as
/// a transient error on the first operation instead of failing construction.
pub struct PostgresHistoryStore {
    pool: PgPool,
}

impl PostgresHistoryStore {
    pub fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(acquire_timeout)
            .connect_lazy(url)
            .map_err(|e| StoreError::Config(format!("Invalid PostgreSQL URL: {}", e)))?;
        info!("PostgreSQL history store configured (max {} connections)", max_connections);
        Ok(Self { pool })
    }
}

#[async_trait]
impl HistoryStore for PostgresHistoryStore {
    async fn init_schema(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *tx).await.map_err(classify)?;
        }
        tx.commit().await.map_err(classify)?;
        Ok(())
    }

    async fn log_conversation(
        &self,
        session_id: &str,
        user_input: &str,
        ai_response: &str
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        sqlx::query(
            "INSERT INTO conversations (session_id, user_input, ai_response) VALUES ($1, $2, $3)"
        )
            .bind(session_id)
            .bind(user_input)
            .bind(ai_response)
            .execute(&mut *tx).await
            .map_err(classify)?;
        tx.commit().await.map_err(classify)?;
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
        let mut tx = self.pool.begin().await.map_err(classify)?;
        sqlx::query(
            "INSERT INTO feedback (session_id, query, response, helpful) VALUES ($1, $2, $3, $4)"
        )
            .bind(session_id)
            .bind(query)
            .bind(response)
            .bind(helpful)
            .execute(&mut *tx).await
            .map_err(classify)?;
        tx.commit().await.map_err(classify)?;
        Ok(())
    }

    async fn get_history(
        &self,
        session_id: &str,
        limit: usize
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(classify)?;
        sqlx::query_as::<_, HistoryEntry>(
            "SELECT user_input, ai_response, created_at
             FROM conversations
             WHERE session_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2"
        )
            .bind(session_id)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&mut *conn).await
            .map_err(classify)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
