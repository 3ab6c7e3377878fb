use async_trait::async_trait;
use log::info;
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ Deserialize, Serialize };

use super::{ non_empty, ChatClient, CompletionResponse };
use crate::llm::{ LlmConfig, ModelError };
use crate::models::chat::ChatMessage;

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAIChatClient {
    http: HttpClient,
    model: String,
    base_url: String,
}

#[derive(Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

impl OpenAIChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>
    ) -> Result<Self, ModelError> {
        let chat_model = model.unwrap_or_else(|| "gpt-4o".to_string());
        let api_url = base_url.unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| ModelError::Config(format!("Invalid API key format: {}", e)))?
        );

        let http = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ModelError::Config(e.to_string()))?;

        Ok(Self {
            http,
            model: chat_model,
            base_url: api_url,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, ModelError> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| ModelError::Config("OpenAI API key is required".to_string()))?;

        Self::new(api_key, config.completion_model.clone(), config.base_url.clone())
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn complete(&self, prompt: &str) -> Result<CompletionResponse, ModelError> {
        self.complete_messages(&[ChatMessage::user(prompt)]).await
    }

    async fn complete_messages(
        &self,
        messages: &[ChatMessage]
    ) -> Result<CompletionResponse, ModelError> {
        info!("OpenAIChatClient::complete_messages() → model={} url={}", self.model, self.base_url);
        let req = OpenAIChatRequest {
            model: self.model.clone(),
            messages: messages
                .iter()
                .map(|m| OpenAIMessage { role: m.role.clone(), content: m.content.clone() })
                .collect(),
            temperature: 0.7,
            max_tokens: Some(2048),
            stream: false,
        };

        let resp = self.http
            .post(self.base_url.trim_end_matches('/'))
            .json(&req)
            .send().await?
            .error_for_status()?;
        let data = resp.json::<OpenAIResponse>().await?;
        let text = data.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(ModelError::EmptyResponse)?;
        non_empty(text)
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }

    fn get_base_url(&self) -> Option<String> {
        Some(self.base_url.clone())
    }
}
