pub mod agent;
pub mod cli;
pub mod error;
pub mod extract;
pub mod format;
pub mod history;
pub mod llm;
pub mod models;
pub mod server;
pub mod session;

use agent::Assistant;
use cli::Args;
use log::{ info, warn };
use server::Server;
use session::SessionSigner;
use std::error::Error;
use std::sync::Arc;

pub fn session_signer(args: &Args) -> Result<SessionSigner, Box<dyn Error + Send + Sync>> {
    let signer = if args.secret_key.is_empty() {
        warn!("SECRET_KEY is not set. Using a random key; sessions will not survive a restart.");
        SessionSigner::random()
    } else {
        SessionSigner::new(args.secret_key.as_bytes())
    };
    let signer = signer.map_err(|e| format!("Invalid secret key: {}", e))?;
    Ok(signer.with_secure(args.enable_tls))
}

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Chat LLM Type: {}", args.chat_llm_type);
    info!("Chat Model: {}", args.chat_model.as_deref().unwrap_or("adapter default"));
    info!("Store Type: {}", args.store_type);
    info!("Store Retry: {} attempts, {}ms base delay", args.store_retry_attempts, args.store_retry_base_delay_ms);
    info!("Feedback Mode: {}", args.feedback_mode);
    info!("History Context Turns: {}", args.history_context_turns);
    info!("Upload Dir: {} (max {} bytes)", args.upload_dir, args.max_upload_bytes);
    info!("Static Dir: {}", args.static_dir);
    info!("Rate Limit: {}/s", args.rate_limit_per_second);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let sessions = session_signer(&args)?;
    let assistant = Arc::new(Assistant::from_args(&args).await?);
    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, assistant, sessions, args)?;
    server.run().await?;

    Ok(())
}
