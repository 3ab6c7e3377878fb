pub mod gemini;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use super::{ LlmConfig, LlmType, ModelError };
use self::gemini::GeminiChatClient;
use self::ollama::OllamaClient;
use self::openai::OpenAIChatClient;
use crate::history::format_history_for_prompt;
use crate::models::chat::ChatMessage;

#[derive(Deserialize, Debug, Clone)]
pub struct CompletionResponse {
    pub response: String,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<CompletionResponse, ModelError>;

    /// Multi-message completion. Providers without a native message API receive the
    /// earlier messages flattened into one prompt ahead of the last one.
    async fn complete_messages(
        &self,
        messages: &[ChatMessage]
    ) -> Result<CompletionResponse, ModelError> {
        self.complete(&flatten_messages(messages)).await
    }

    fn get_model(&self) -> String;
    fn get_base_url(&self) -> Option<String>;
}

pub fn flatten_messages(messages: &[ChatMessage]) -> String {
    match messages.split_last() {
        None => String::new(),
        Some((last, earlier)) => {
            let history = format_history_for_prompt(earlier);
            if history.is_empty() {
                last.content.clone()
            } else {
                format!("{}\n{}", history, last.content)
            }
        }
    }
}

pub(crate) fn non_empty(text: String) -> Result<CompletionResponse, ModelError> {
    if text.trim().is_empty() {
        return Err(ModelError::EmptyResponse);
    }
    Ok(CompletionResponse { response: text })
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, ModelError> {
    let client: Arc<dyn ChatClient> = match config.llm_type {
        LlmType::Gemini => {
            let specific_client = GeminiChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::OpenAI => {
            let specific_client = OpenAIChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::Ollama => {
            let specific_client = OllamaClient::from_config(config)?;
            Arc::new(specific_client)
        }
    };
    Ok(client)
}
