//! HTTP server: REST endpoints over the `llm` collaborator plus the browser client's assets.
//!
//! Every request is handled independently; the only shared mutable state is the bounded
//! chat registry. Streaming endpoints relay collaborator output as it is produced.

mod assets;
mod error;
mod handlers;
mod protocol;
mod upload;

pub use assets::AssetSource;
pub use error::ApiError;
pub use protocol::{
    PromptResponse, TemplatesResponse, UploadResponse, CHAT_ID_HEADER, CONVERSATION_ID_HEADER,
};

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::path::PathBuf;
use std::sync::Arc;

use crate::chats::ChatRegistry;
use crate::config::{self, Config};
use crate::llm::{Collaborator, LlmCli};

/// Shared state for handlers (config, collaborator, chat registry, storage locations).
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub collaborator: Arc<dyn Collaborator>,
    pub chats: Arc<ChatRegistry>,
    /// Uploads land here; never served over HTTP.
    pub upload_dir: PathBuf,
    pub assets: AssetSource,
}

impl ServerState {
    pub fn new(config: Config, collaborator: Arc<dyn Collaborator>) -> Self {
        let upload_dir = config::resolve_upload_dir(&config);
        let assets = if config.server.reload {
            AssetSource::Disk(config::resolve_assets_dir(&config))
        } else {
            AssetSource::Embedded
        };
        Self {
            config: Arc::new(config),
            collaborator,
            chats: Arc::new(ChatRegistry::default()),
            upload_dir,
            assets,
        }
    }

    /// State backed by the `llm` binary named in config.
    pub fn from_config(config: Config) -> Self {
        let cli = LlmCli::from_config(&config);
        Self::new(config, Arc::new(cli))
    }
}

/// All routes. Upload routes carry their own body limit.
pub fn build_router(state: ServerState) -> Router {
    let uploads = Router::new()
        .route("/api/upload", post(upload::upload_file))
        .route("/api/upload-clipboard", post(upload::upload_file))
        .layer(DefaultBodyLimit::max(state.config.uploads.max_bytes));

    Router::new()
        .route("/", get(assets::index))
        .route("/static/*path", get(assets::static_file))
        .route("/health", get(handlers::health))
        .route("/api/models", get(handlers::models))
        .route("/api/templates", get(handlers::templates))
        .route("/api/tools", get(handlers::tools))
        .route("/api/prompt", post(handlers::prompt))
        .route("/api/chat", post(handlers::chat))
        .route("/api/chat/:chat_id", get(handlers::chat_status))
        .route("/api/logs", get(handlers::logs))
        .route("/api/conversations", get(handlers::conversations))
        .route("/api/conversations/:conversation_id", get(handlers::conversation))
        .route("/api/help", get(handlers::help))
        .merge(uploads)
        .with_state(state)
}

/// Run the server; binds to config.server.host:config.server.port and blocks until Ctrl+C or SIGTERM.
/// There is no authentication: binding beyond loopback only logs a warning.
pub async fn run_server(config: Config) -> Result<()> {
    let host = config.server.host.trim().to_string();
    let port = config.server.port;
    if !config::is_loopback_bind(&host) {
        log::warn!(
            "binding to {} without authentication; put a reverse proxy with auth in front of it",
            host
        );
    }
    if config.server.reload {
        log::info!(
            "reload enabled: serving assets from {}",
            config::resolve_assets_dir(&config).display()
        );
    }
    let state = ServerState::from_config(config);
    log::info!(
        "using llm binary {}, uploads in {}",
        config::resolve_llm_binary(&state.config).display(),
        state.upload_dir.display()
    );
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("binding to {}:{}", host, port))?;
    log::info!("LLM WebUI listening on http://{}:{}", host, port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited")?;
    log::info!("server stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}
