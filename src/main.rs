//! Sproutie - chat backend for the Sproutie plant assistant
//!
//! Resolves owner-scoped chat sessions, persists transcripts, reconciles
//! previously-uploaded images, and proxies generation to the Gemini API.

mod api;
mod blob;
mod chat;
mod config;
mod llm;
mod reconcile;
mod session;
mod store;

use api::{create_router, AppState};
use blob::GeminiFileStore;
use chat::ChatService;
use config::{AppConfig, StorageBackend};
use llm::{GeminiService, LoggingService};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use store::{FileStore, HistoryStore, SqliteStore};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sproutie=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env();

    // Initialize persistence
    let store: Arc<dyn HistoryStore> = match &config.backend {
        StorageBackend::Sqlite(path) => {
            if let Some(parent) = PathBuf::from(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            tracing::info!(path = %path, "Opening SQLite history store");
            Arc::new(SqliteStore::open(path)?)
        }
        StorageBackend::File(dir) => {
            tracing::info!(dir = %dir, "Opening flat-file history store");
            Arc::new(FileStore::open(dir)?)
        }
    };

    // Initialize the Gemini collaborators
    let api_key = match &config.gemini_api_key {
        Some(key) => key.clone(),
        None => {
            tracing::warn!("GEMINI_API_KEY not set; chat requests will fail upstream");
            String::new()
        }
    };
    let gemini = GeminiService::new(api_key.clone(), &config.model)?;
    let llm = Arc::new(LoggingService::new(Arc::new(gemini)));
    let blob = Arc::new(GeminiFileStore::new(api_key)?);

    tracing::info!(model = %config.model, "Inference client initialized");

    let chat = Arc::new(ChatService::new(
        store,
        llm,
        blob,
        config.system_prompt.clone(),
    ));
    let state = AppState::new(chat);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state).layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Sproutie API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
