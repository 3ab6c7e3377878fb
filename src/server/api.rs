use crate::agent::Assistant;
use crate::error::AppError;
use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::models::api::{
    ChatRequest,
    ChatResponse,
    FeedbackRequest,
    HistoryQuery,
    HistoryResponse,
    StatusResponse,
    UploadResponse,
};
use crate::session::SessionSigner;

use axum::{
    extract::{ DefaultBodyLimit, Multipart, Query, Request, State },
    extract::multipart::MultipartRejection,
    extract::rejection::{ JsonRejection, QueryRejection },
    middleware::{ self, Next },
    response::{ Html, IntoResponse, Response },
    routing::{ get, post },
    Json,
    Router,
};
use axum_extra::extract::cookie::CookieJar;
use governor::{ RateLimiter, Quota, state::{ InMemoryState, NotKeyed }, clock::DefaultClock };
use log::{ info, warn };
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{ Any, CorsLayer };
use tower_http::services::ServeDir;

const FALLBACK_INDEX: &str = include_str!("../../static/index.html");
/// Headroom for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

type RequestLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Clone)]
pub struct AppState {
    pub assistant: Arc<Assistant>,
    pub sessions: SessionSigner,
    limiter: Arc<RequestLimiter>,
    static_dir: PathBuf,
}

impl AppState {
    pub fn new(
        assistant: Arc<Assistant>,
        sessions: SessionSigner,
        requests_per_second: NonZeroU32,
        static_dir: impl Into<PathBuf>
    ) -> Self {
        Self {
            assistant,
            sessions,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(requests_per_second))),
            static_dir: static_dir.into(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let body_limit = state.assistant.settings().max_upload_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route("/", get(index_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/upload", post(upload_handler))
        .route("/api/feedback", post(feedback_handler))
        .route("/api/history", get(history_handler))
        .nest_service("/static", ServeDir::new(&state.static_dir))
        .layer(
            ServiceBuilder::new()
                .layer(cors)
                .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
                .layer(DefaultBodyLimit::max(body_limit))
        )
        .with_state(state)
}

async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next
) -> Result<Response, AppError> {
    if state.limiter.check().is_err() {
        warn!("Rate limit exceeded: {} {}", request.method(), request.uri().path());
        return Err(AppError::RateLimited);
    }
    Ok(next.run(request).await)
}

async fn index_handler(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let jar = if state.sessions.session_from_jar(&jar).is_some() {
        jar
    } else {
        let token = state.sessions.issue();
        info!("Issued new session");
        jar.add(state.sessions.cookie(&token))
    };

    let page = match tokio::fs::read_to_string(state.static_dir.join("index.html")).await {
        Ok(page) => page,
        Err(_) => FALLBACK_INDEX.to_string(),
    };
    (jar, Html(page))
}

async fn chat_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<ChatRequest>, JsonRejection>
) -> Result<Json<ChatResponse>, AppError> {
    let Json(req) = payload.map_err(|e| AppError::Validation(e.body_text()))?;
    let session = state.sessions.session_from_jar(&jar);
    info!("Chat request ({} chars)", req.message.len());

    let reply = state.assistant.chat(session.as_deref(), &req.message).await?;
    Ok(Json(ChatResponse { response: reply.html, raw_response: reply.raw }))
}

async fn upload_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>
) -> Result<Json<UploadResponse>, AppError> {
    let mut multipart = multipart.map_err(|_| AppError::Validation("No file".into()))?;
    let max_bytes = state.assistant.settings().max_upload_bytes;

    while
        let Some(mut field) = multipart
            .next_field().await
            .map_err(|e| AppError::Validation(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        state.assistant.validate_upload(&filename, 0)?;

        let mut bytes = Vec::new();
        while
            let Some(chunk) = field
                .chunk().await
                .map_err(|e| AppError::Validation(e.body_text()))?
        {
            if bytes.len() + chunk.len() > max_bytes {
                return Err(AppError::Validation("File too large".into()));
            }
            bytes.extend_from_slice(&chunk);
        }

        info!("Upload received: {} ({} bytes)", filename, bytes.len());
        let summary = state.assistant.summarize_document(&filename, &bytes).await?;
        return Ok(Json(UploadResponse { response: summary.html, preview: summary.preview }));
    }

    Err(AppError::Validation("No file".into()))
}

async fn feedback_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<FeedbackRequest>, JsonRejection>
) -> Result<Json<StatusResponse>, AppError> {
    let Json(feedback) = payload.map_err(|e| AppError::Validation(e.body_text()))?;
    let session = state.sessions.session_from_jar(&jar);
    info!("Feedback received (helpful={})", feedback.helpful);

    state.assistant.record_feedback(session.as_deref(), &feedback).await?;
    Ok(Json(StatusResponse { status: "success".to_string() }))
}

async fn history_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    query: Result<Query<HistoryQuery>, QueryRejection>
) -> Result<Json<HistoryResponse>, AppError> {
    let Query(query) = query.map_err(|e| AppError::Validation(e.body_text()))?;
    let session = state.sessions.session_from_jar(&jar);
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);

    let history = state.assistant.history(session.as_deref(), limit).await?;
    Ok(Json(HistoryResponse { history }))
}
