use crate::cli::Args;
use crate::error::AppError;
use crate::extract::{
    allowed_file,
    document_prompt,
    extension,
    preview,
    secure_filename,
    FileTextExtractor,
    TextExtractor,
};
use crate::format::format_response;
use crate::history::{ history_to_messages, initialize_history_store, FeedbackMode, HistoryStore };
use crate::llm::{ LlmConfig, LlmType };
use crate::llm::chat::{ ChatClient, new_client as new_chat_client };
use crate::models::api::FeedbackRequest;
use crate::models::chat::{ ChatMessage, HistoryEntry };

use log::{ debug, info, warn };
use std::error::Error;
use std::path::{ Path, PathBuf };
use std::sync::Arc;
use uuid::Uuid;

pub const MAX_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub history_context_turns: usize,
    pub feedback_mode: FeedbackMode,
    pub include_raw_response: bool,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl AssistantSettings {
    pub fn from_args(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(Self {
            history_context_turns: args.history_context_turns,
            feedback_mode: args.feedback_mode.parse()?,
            include_raw_response: args.include_raw_response,
            upload_dir: PathBuf::from(&args.upload_dir),
            max_upload_bytes: args.max_upload_bytes,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ChatReply {
    pub html: String,
    pub raw: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentSummary {
    pub html: String,
    pub preview: String,
}

/// Request-level orchestration: prompt building, model call, formatting, persistence.
#[derive(Clone)]
pub struct Assistant {
    chat_client: Arc<dyn ChatClient>,
    history_store: Arc<dyn HistoryStore>,
    extractor: Arc<dyn TextExtractor>,
    settings: AssistantSettings,
}

impl Assistant {
    pub fn new(
        chat_client: Arc<dyn ChatClient>,
        history_store: Arc<dyn HistoryStore>,
        extractor: Arc<dyn TextExtractor>,
        settings: AssistantSettings
    ) -> Self {
        Self { chat_client, history_store, extractor, settings }
    }

    fn initialize_chat_client(
        args: &Args
    ) -> Result<Arc<dyn ChatClient>, Box<dyn Error + Send + Sync>> {
        let chat_llm_type: LlmType = args.chat_llm_type.parse()?;
        let chat_api_key = if !args.chat_api_key.is_empty() {
            Some(args.chat_api_key.clone())
        } else {
            None
        };
        let chat_config = LlmConfig {
            llm_type: chat_llm_type,
            base_url: args.chat_base_url.clone(),
            api_key: chat_api_key,
            completion_model: args.chat_model.clone(),
        };
        let chat_client = new_chat_client(&chat_config)?;
        info!(
            "Chat client configured: Type={}, Model={}, BaseURL={}",
            args.chat_llm_type,
            chat_client.get_model(),
            chat_client.get_base_url().as_deref().unwrap_or("adapter default")
        );
        Ok(chat_client)
    }

    pub async fn from_args(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let settings = AssistantSettings::from_args(args)?;
        let chat_client = Self::initialize_chat_client(args)?;
        let history_store = initialize_history_store(args).await?;
        tokio::fs::create_dir_all(&settings.upload_dir).await.map_err(|e|
            format!("Failed to create upload directory {}: {}", settings.upload_dir.display(), e)
        )?;

        Ok(Self::new(chat_client, history_store, Arc::new(FileTextExtractor), settings))
    }

    pub fn settings(&self) -> &AssistantSettings {
        &self.settings
    }

    async fn context_messages(&self, session_id: &str) -> Vec<ChatMessage> {
        if self.settings.history_context_turns == 0 {
            return Vec::new();
        }
        match self.history_store.get_history(session_id, self.settings.history_context_turns).await {
            Ok(entries) => history_to_messages(&entries),
            Err(e) => {
                warn!("History unavailable, answering without context: {}", e);
                Vec::new()
            }
        }
    }

    /// Answers one chat message and records the turn. The message is checked before
    /// the session so an empty body is always a 400.
    pub async fn chat(
        &self,
        session_id: Option<&str>,
        message: &str
    ) -> Result<ChatReply, AppError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(AppError::Validation("Empty message".into()));
        }
        let session_id = session_id.ok_or(AppError::Unauthorized)?;

        let mut messages = self.context_messages(session_id).await;
        debug!("Sending {} context messages with the chat prompt", messages.len());
        messages.push(ChatMessage::user(message));

        let reply = self.chat_client.complete_messages(&messages).await?;
        let html = format_response(&reply.response);
        self.history_store.log_conversation(session_id, message, &reply.response).await?;

        Ok(ChatReply {
            html,
            raw: self.settings.include_raw_response.then_some(reply.response),
        })
    }

    /// Rejections that must happen before anything is written or sent to the model.
    pub fn validate_upload(&self, filename: &str, size: usize) -> Result<(), AppError> {
        if filename.is_empty() {
            return Err(AppError::Validation("Empty filename".into()));
        }
        if !allowed_file(filename) {
            return Err(AppError::Validation("Unsupported file type".into()));
        }
        if size > self.settings.max_upload_bytes {
            return Err(AppError::Validation("File too large".into()));
        }
        Ok(())
    }

    fn stored_upload_path(&self, filename: &str) -> PathBuf {
        let id = Uuid::new_v4().simple();
        let safe = secure_filename(filename);
        let name = if allowed_file(&safe) {
            format!("{}_{}", id, safe)
        } else {
            format!("{}.{}", id, extension(filename).unwrap_or_default())
        };
        self.settings.upload_dir.join(name)
    }

    /// Stores the upload, summarizes it and removes the stored copy on every path.
    pub async fn summarize_document(
        &self,
        filename: &str,
        bytes: &[u8]
    ) -> Result<DocumentSummary, AppError> {
        self.validate_upload(filename, bytes.len())?;

        let path = self.stored_upload_path(filename);
        info!("Processing upload '{}' ({} bytes) as {}", filename, bytes.len(), path.display());
        tokio::fs::write(&path, bytes).await.map_err(|e|
            AppError::Internal(format!("Failed to store upload {}: {}", path.display(), e))
        )?;

        let result = self.summarize_stored(&path).await;
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!("Failed to remove upload {}: {}", path.display(), e);
        }
        result
    }

    async fn summarize_stored(&self, path: &Path) -> Result<DocumentSummary, AppError> {
        let text = self.extractor.extract_text(path).await?;
        let reply = self.chat_client.complete(&document_prompt(&text)).await?;
        Ok(DocumentSummary {
            html: format_response(&reply.response),
            preview: preview(&text),
        })
    }

    pub async fn record_feedback(
        &self,
        session_id: Option<&str>,
        feedback: &FeedbackRequest
    ) -> Result<(), AppError> {
        let attributed = match self.settings.feedback_mode {
            FeedbackMode::Session => session_id,
            FeedbackMode::Global => None,
        };
        self.history_store.log_feedback(
            attributed,
            &feedback.query,
            &feedback.response,
            feedback.helpful
        ).await?;
        Ok(())
    }

    pub async fn history(
        &self,
        session_id: Option<&str>,
        limit: usize
    ) -> Result<Vec<HistoryEntry>, AppError> {
        let session_id = session_id.ok_or(AppError::Unauthorized)?;
        let limit = limit.min(MAX_HISTORY_LIMIT);
        Ok(self.history_store.get_history(session_id, limit).await?)
    }

    pub async fn shutdown(&self) {
        info!("Closing history store");
        self.history_store.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractionError;
    use crate::history::StoreError;
    use crate::llm::ModelError;
    use crate::llm::chat::CompletionResponse;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeClient {
        prompts: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl ChatClient for FakeClient {
        async fn complete(&self, prompt: &str) -> Result<CompletionResponse, ModelError> {
            self.complete_messages(&[ChatMessage::user(prompt)]).await
        }

        async fn complete_messages(
            &self,
            messages: &[ChatMessage]
        ) -> Result<CompletionResponse, ModelError> {
            self.prompts.lock().unwrap().push(messages.to_vec());
            Ok(CompletionResponse { response: "**ok**".to_string() })
        }

        fn get_model(&self) -> String {
            "fake".to_string()
        }

        fn get_base_url(&self) -> Option<String> {
            None
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        turns: Mutex<Vec<(String, String, String)>>,
        feedback: Mutex<Vec<(Option<String>, bool)>>,
        fail_reads: bool,
    }

    #[async_trait]
    impl HistoryStore for MemoryStore {
        async fn init_schema(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn log_conversation(
            &self,
            session_id: &str,
            user_input: &str,
            ai_response: &str
        ) -> Result<(), StoreError> {
            self.turns
                .lock()
                .unwrap()
                .push((session_id.into(), user_input.into(), ai_response.into()));
            Ok(())
        }

        async fn log_feedback(
            &self,
            session_id: Option<&str>,
            _query: &str,
            _response: &str,
            helpful: bool
        ) -> Result<(), StoreError> {
            self.feedback.lock().unwrap().push((session_id.map(str::to_string), helpful));
            Ok(())
        }

        async fn get_history(
            &self,
            session_id: &str,
            limit: usize
        ) -> Result<Vec<HistoryEntry>, StoreError> {
            if self.fail_reads {
                return Err(StoreError::Exhausted { attempts: 3, last: "down".into() });
            }
            Ok(
                self.turns
                    .lock()
                    .unwrap()
                    .iter()
                    .rev()
                    .filter(|(s, _, _)| s == session_id)
                    .take(limit)
                    .map(|(_, u, a)| HistoryEntry {
                        user_input: u.clone(),
                        ai_response: a.clone(),
                        created_at: Utc::now(),
                    })
                    .collect()
            )
        }
    }

    struct FailingExtractor;

    #[async_trait]
    impl TextExtractor for FailingExtractor {
        async fn extract_text(&self, _path: &Path) -> Result<String, ExtractionError> {
            Err(ExtractionError::Parse { kind: "pdf", message: "broken".into() })
        }
    }

    fn settings(dir: &TempDir) -> AssistantSettings {
        AssistantSettings {
            history_context_turns: 5,
            feedback_mode: FeedbackMode::Session,
            include_raw_response: false,
            upload_dir: dir.path().to_path_buf(),
            max_upload_bytes: 1024,
        }
    }

    fn assistant(
        dir: &TempDir,
        store: Arc<MemoryStore>
    ) -> (Assistant, Arc<FakeClient>) {
        let client = Arc::new(FakeClient::default());
        let assistant = Assistant::new(
            client.clone(),
            store,
            Arc::new(FileTextExtractor),
            settings(dir)
        );
        (assistant, client)
    }

    #[tokio::test]
    async fn chat_formats_and_persists_the_raw_reply() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::default());
        let (assistant, _) = assistant(&dir, store.clone());

        let reply = assistant.chat(Some("s1"), "  hello  ").await.unwrap();
        assert_eq!(reply.html, "<strong>ok</strong>");
        assert_eq!(reply.raw, None);
        let turns = store.turns.lock().unwrap();
        assert_eq!(*turns, vec![("s1".to_string(), "hello".to_string(), "**ok**".to_string())]);
    }

    #[tokio::test]
    async fn chat_checks_message_before_session() {
        let dir = TempDir::new().unwrap();
        let (assistant, client) = assistant(&dir, Arc::new(MemoryStore::default()));

        assert!(matches!(assistant.chat(None, "   ").await, Err(AppError::Validation(_))));
        assert!(matches!(assistant.chat(None, "hi").await, Err(AppError::Unauthorized)));
        assert!(client.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn chat_sends_earlier_turns_in_order() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::default());
        let (assistant, client) = assistant(&dir, store);

        assistant.chat(Some("s1"), "first").await.unwrap();
        assistant.chat(Some("s2"), "other session").await.unwrap();
        assistant.chat(Some("s1"), "second").await.unwrap();

        let prompts = client.prompts.lock().unwrap();
        assert_eq!(
            prompts[2],
            vec![ChatMessage::user("first"), ChatMessage::assistant("**ok**"), ChatMessage::user("second")]
        );
    }

    #[tokio::test]
    async fn unreadable_history_degrades_to_no_context() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore { fail_reads: true, ..MemoryStore::default() });
        let (assistant, client) = assistant(&dir, store.clone());

        assistant.chat(Some("s1"), "hi").await.unwrap();
        assert_eq!(client.prompts.lock().unwrap()[0], vec![ChatMessage::user("hi")]);
        assert_eq!(store.turns.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn raw_reply_is_opt_in() {
        let dir = TempDir::new().unwrap();
        let mut assistant = assistant(&dir, Arc::new(MemoryStore::default())).0;
        assistant.settings.include_raw_response = true;

        let reply = assistant.chat(Some("s1"), "hi").await.unwrap();
        assert_eq!(reply.raw.as_deref(), Some("**ok**"));
    }

    #[tokio::test]
    async fn feedback_attribution_follows_mode() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::default());
        let mut assistant = assistant(&dir, store.clone()).0;
        let feedback = FeedbackRequest { helpful: true, ..FeedbackRequest::default() };

        assistant.record_feedback(Some("s1"), &feedback).await.unwrap();
        assistant.record_feedback(None, &feedback).await.unwrap();
        assistant.settings.feedback_mode = FeedbackMode::Global;
        assistant.record_feedback(Some("s1"), &feedback).await.unwrap();

        assert_eq!(
            *store.feedback.lock().unwrap(),
            vec![(Some("s1".to_string()), true), (None, true), (None, true)]
        );
    }

    #[tokio::test]
    async fn summarizes_text_upload_and_removes_it() {
        let dir = TempDir::new().unwrap();
        let (assistant, client) = assistant(&dir, Arc::new(MemoryStore::default()));

        let summary = assistant.summarize_document("notes.txt", b"quarterly numbers").await.unwrap();
        assert_eq!(summary.html, "<strong>ok</strong>");
        assert_eq!(summary.preview, "quarterly numbers");

        let prompts = client.prompts.lock().unwrap();
        assert!(prompts[0][0].content.starts_with("Analyze this document and provide:"));
        assert!(prompts[0][0].content.ends_with("quarterly numbers"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn rejected_uploads_never_reach_the_model() {
        let dir = TempDir::new().unwrap();
        let (assistant, client) = assistant(&dir, Arc::new(MemoryStore::default()));

        for (name, size) in [("", 10), ("tool.exe", 10), ("big.txt", 2048)] {
            let err = assistant.summarize_document(name, &vec![b'a'; size]).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)), "{name}");
        }
        assert!(client.prompts.lock().unwrap().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn extraction_failure_still_removes_the_upload() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(FakeClient::default());
        let assistant = Assistant::new(
            client.clone(),
            Arc::new(MemoryStore::default()),
            Arc::new(FailingExtractor),
            settings(&dir)
        );

        let err = assistant.summarize_document("scan.pdf", b"%PDF").await.unwrap_err();
        assert!(matches!(err, AppError::Extraction(_)));
        assert!(client.prompts.lock().unwrap().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn history_requires_session_and_caps_limit() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::default());
        let (assistant, _) = assistant(&dir, store.clone());
        for i in 0..120 {
            store.log_conversation("s1", &format!("q{}", i), "a").await.unwrap();
        }

        assert!(matches!(assistant.history(None, 10).await, Err(AppError::Unauthorized)));
        let all = assistant.history(Some("s1"), 500).await.unwrap();
        assert_eq!(all.len(), MAX_HISTORY_LIMIT);
        assert_eq!(all[0].user_input, "q119");
    }

    #[test]
    fn stored_names_keep_the_extension() {
        let dir = TempDir::new().unwrap();
        let (assistant, _) = assistant(&dir, Arc::new(MemoryStore::default()));

        let path = assistant.stored_upload_path("../my report.PDF");
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("_my_report.PDF"));

        let path = assistant.stored_upload_path("отчет.docx");
        assert_eq!(path.extension().unwrap(), "docx");
    }
}
