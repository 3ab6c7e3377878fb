pub mod api;

use crate::agent::Assistant;
use crate::cli::Args;
use crate::session::SessionSigner;
use api::{ router, AppState };

use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use log::{ info, warn };
use std::error::Error;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct Server {
    addr: String,
    state: AppState,
    args: Args,
}

impl Server {
    pub fn new(
        addr: String,
        assistant: Arc<Assistant>,
        sessions: SessionSigner,
        args: Args
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let per_second = NonZeroU32::new(args.rate_limit_per_second).ok_or(
            "RATE_LIMIT_PER_SECOND must be greater than zero"
        )?;
        let state = AppState::new(assistant, sessions, per_second, &args.static_dir);
        Ok(Self { addr, state, args })
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let addr: SocketAddr = self.addr.parse()?;
        let app = router(self.state.clone());

        match (self.args.enable_tls, &self.args.tls_cert_path, &self.args.tls_key_path) {
            (true, Some(cert_path), Some(key_path)) => {
                let tls_config = RustlsConfig::from_pem_file(cert_path, key_path).await?;
                let handle = Handle::new();
                let shutdown_handle = handle.clone();
                tokio::spawn(async move {
                    shutdown_signal().await;
                    shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
                });

                info!("HTTPS server listening on: https://{}", addr);
                axum_server::bind_rustls(addr, tls_config)
                    .handle(handle)
                    .serve(app.into_make_service()).await?;
            }
            (true, _, _) => {
                return Err("ENABLE_TLS requires TLS_CERT_PATH and TLS_KEY_PATH".into());
            }
            _ => {
                let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e|
                    format!("Failed to bind HTTP server to {}: {}", addr, e)
                )?;
                info!("HTTP server listening on: http://{}", addr);
                axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
            }
        }

        info!("Server stopped, releasing resources");
        self.state.assistant.shutdown().await;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}
