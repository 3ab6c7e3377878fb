use chrono::{ DateTime, Utc };
use serde::{ Serialize, Deserialize };

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

/// One stored conversation turn as returned by history retrieval.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct HistoryEntry {
    pub user_input: String,
    pub ai_response: String,
    pub created_at: DateTime<Utc>,
}
