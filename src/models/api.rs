use serde::{ Serialize, Deserialize };

use super::chat::HistoryEntry;

#[derive(Deserialize, Debug)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ChatResponse {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UploadResponse {
    pub response: String,
    pub preview: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct FeedbackRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub helpful: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Deserialize, Debug)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HistoryResponse {
    pub history: Vec<HistoryEntry>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}
