mod postgres;
mod retry;
mod sqlite;

pub use postgres::PostgresHistoryStore;
pub use retry::{ RetryPolicy, RetryingStore };
pub use sqlite::SqliteHistoryStore;

use async_trait::async_trait;
use log::info;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use crate::cli::Args;
use crate::models::chat::{ ChatMessage, HistoryEntry };

pub const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Connectivity or timeout failure expected to resolve on its own.
    #[error("store unavailable: {0}")]
    Transient(String),

    #[error("store error: {0}")]
    Query(String),

    #[error("store unavailable after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: String,
    },

    #[error("invalid store configuration: {0}")]
    Config(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Creates tables and indexes if absent. Safe to call on every start.
    async fn init_schema(&self) -> Result<(), StoreError>;

    async fn log_conversation(
        &self,
        session_id: &str,
        user_input: &str,
        ai_response: &str
    ) -> Result<(), StoreError>;

    async fn log_feedback(
        &self,
        session_id: Option<&str>,
        query: &str,
        response: &str,
        helpful: bool
    ) -> Result<(), StoreError>;

    /// Most recent turns of a session, newest first, never more than `limit`.
    async fn get_history(
        &self,
        session_id: &str,
        limit: usize
    ) -> Result<Vec<HistoryEntry>, StoreError>;

    async fn close(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    Sqlite,
    Postgres,
}

impl FromStr for StoreType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(StoreType::Sqlite),
            "postgres" | "postgresql" => Ok(StoreType::Postgres),
            _ => Err(StoreError::Config(format!("Unsupported store type: {}", s))),
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreType::Sqlite => write!(f, "sqlite"),
            StoreType::Postgres => write!(f, "postgres"),
        }
    }
}

/// Whether feedback rows carry the caller's session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackMode {
    Session,
    Global,
}

impl FromStr for FeedbackMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "session" => Ok(FeedbackMode::Session),
            "global" => Ok(FeedbackMode::Global),
            _ => Err(StoreError::Config(format!("Unsupported feedback mode: {}", s))),
        }
    }
}

pub async fn create_history_store(args: &Args) -> Result<Arc<dyn HistoryStore>, StoreError> {
    let store_type: StoreType = args.store_type.parse()?;
    let connect_timeout = Duration::from_secs(args.db_connect_timeout_secs);
    let store: Arc<dyn HistoryStore> = match store_type {
        StoreType::Sqlite => {
            Arc::new(
                SqliteHistoryStore::connect(
                    &args.database_url,
                    args.db_max_connections,
                    connect_timeout
                ).await?
            )
        }
        StoreType::Postgres => {
            Arc::new(
                PostgresHistoryStore::connect(
                    &args.database_url,
                    args.db_max_connections,
                    connect_timeout
                )?
            )
        }
    };

    let policy = RetryPolicy::new(
        args.store_retry_attempts,
        Duration::from_millis(args.store_retry_base_delay_ms)
    );
    Ok(Arc::new(RetryingStore::new(store, policy)))
}

pub async fn initialize_history_store(args: &Args) -> Result<Arc<dyn HistoryStore>, StoreError> {
    info!("Conversation history will be stored in: {}", args.store_type);
    let store = create_history_store(args).await?;
    store.init_schema().await?;
    info!("History store schema ready");
    Ok(store)
}

/// Stored turns (newest first) as chronological user/assistant messages.
pub fn history_to_messages(entries: &[HistoryEntry]) -> Vec<ChatMessage> {
    entries
        .iter()
        .rev()
        .flat_map(|entry| {
            [ChatMessage::user(entry.user_input.clone()), ChatMessage::assistant(entry.ai_response.clone())]
        })
        .collect()
}

pub fn format_history_for_prompt(messages: &[ChatMessage]) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let mut result = String::from("Previous conversation:\n");
    for msg in messages {
        let role_display = match msg.role.as_str() {
            "user" => "User",
            "assistant" => "Assistant",
            other => other,
        };

        result.push_str(&format!("{}: {}\n", role_display, msg.content));
    }

    result
}
