use async_trait::async_trait;
use log::info;

use super::{ non_empty, ChatClient, CompletionResponse };
use crate::llm::{ LlmConfig, ModelError };
use crate::models::chat::ChatMessage as HistoryMessage;
use rllm::chat::{ ChatMessage, ChatRole, MessageType };
use rllm::builder::{ LLMBackend, LLMBuilder };
use rllm::LLMProvider;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

pub struct GeminiChatClient {
    llm: Box<dyn LLMProvider>,
    model: String,
    base_url: Option<String>,
}

fn to_rllm_message(message: &HistoryMessage) -> ChatMessage {
    let role = match message.role.as_str() {
        "assistant" => ChatRole::Assistant,
        _ => ChatRole::User,
    };
    ChatMessage {
        role,
        content: message.content.clone(),
        message_type: MessageType::Text,
    }
}

impl GeminiChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>
    ) -> Result<Self, ModelError> {
        let chat_model = model.unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string());

        let mut builder = LLMBuilder::new()
            .backend(LLMBackend::Google)
            .api_key(api_key)
            .model(&chat_model)
            .stream(false);

        if let Some(url) = &base_url {
            builder = builder.base_url(url);
        }
        if let Some(tokens) = max_tokens {
            builder = builder.max_tokens(tokens);
        }
        if let Some(temp) = temperature {
            builder = builder.temperature(temp);
        }

        let llm_provider = builder
            .build()
            .map_err(|e| ModelError::Config(format!("Failed to build Gemini client: {}", e)))?;

        Ok(Self {
            llm: llm_provider,
            model: chat_model,
            base_url,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, ModelError> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| ModelError::Config("Google API key is required for GeminiChatClient".to_string()))?;

        Self::new(api_key, config.completion_model.clone(), config.base_url.clone(), None, None)
    }

    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<CompletionResponse, ModelError> {
        let resp = self.llm
            .chat(&messages).await
            .map_err(|e| ModelError::Request(e.to_string()))?;
        let text = resp
            .text()
            .map(|s| s.to_string())
            .unwrap_or_else(|| resp.to_string());
        non_empty(text)
    }
}

#[async_trait]
impl ChatClient for GeminiChatClient {
    async fn complete(&self, prompt: &str) -> Result<CompletionResponse, ModelError> {
        info!("GeminiChatClient::complete() → model={} base_url={:?}", self.model, self.base_url);
        self.chat(
            vec![ChatMessage {
                role: ChatRole::User,
                content: prompt.to_string(),
                message_type: MessageType::Text,
            }]
        ).await
    }

    async fn complete_messages(
        &self,
        messages: &[HistoryMessage]
    ) -> Result<CompletionResponse, ModelError> {
        info!(
            "GeminiChatClient::complete_messages() → model={} messages={}",
            self.model,
            messages.len()
        );
        self.chat(messages.iter().map(to_rllm_message).collect()).await
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }

    fn get_base_url(&self) -> Option<String> {
        self.base_url.clone()
    }
}
