//! NLQ Dashboard - natural-language analytics chat
//!
//! A Rust backend that drives multi-step workflow conversations: it streams
//! answers from the workflow backend, follows continuation pointers and
//! relays browser calls to the backend.

mod api;
mod config;
mod conversation;
mod db;
mod runtime;
mod state_machine;
mod workflow;

use api::{create_router, AppState, Relay};
use config::AppConfig;
use db::Database;
use runtime::RuntimeManager;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workflow::{HttpWorkflowClient, LoggingClient, WorkflowClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nlq_dashboard=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let config = AppConfig::from_env();

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&config.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Initialize database
    tracing::info!(path = %config.db_path, "Opening database");
    let db = Database::open(&config.db_path)?;

    // Requests in flight did not survive the restart
    let reset = db.reset_busy_to_idle()?;
    if reset > 0 {
        tracing::info!(count = reset, "Reset interrupted sessions to idle");
    }

    // Workflow backend
    tracing::info!(
        base_url = %config.workflow.base_url,
        chat_url = %config.workflow.chat_url(),
        max_attempts = config.retry.max_attempts,
        "Workflow backend configured"
    );
    let http_client: Arc<dyn WorkflowClient> = Arc::new(HttpWorkflowClient::new(&config.workflow)?);
    let client: Arc<dyn WorkflowClient> = Arc::new(LoggingClient::new(http_client));
    let relay = Relay::new(config.workflow.clone())?;

    // Create application state
    let runtime = RuntimeManager::new(db, client, config.retry, config.greeting.clone());
    let state = AppState::new(runtime, relay);

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(cors)
        .layer(compression)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("NLQ dashboard server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
