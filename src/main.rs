//! Flowline - multi-tenant conversational automation backend
//!
//! A workflow engine that arbitrates inbound customer messages between
//! authored automation workflows and a fallback AI persona, with CRM and
//! scheduling side-effects.

mod api;
mod channels;
mod config;
mod context;
mod crm;
mod db;
mod engine;
mod llm;
mod scheduling;
mod security;
mod workflow;

use api::{create_router, AppState};
use channels::{whatsapp::WhatsAppSender, ChannelSender};
use config::Config;
use db::Database;
use engine::Engine;
use llm::{LlmGateway, LoggingService, OpenAiCompatService};
use security::TokenCipher;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Queue workers draining node-step tasks.
const WORKER_COUNT: usize = 4;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowline=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = Config::from_env();

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&config.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path, "Opening database");
    let db = Database::open(&config.db_path)?;

    // LLM gateway
    let api_key = match &config.llm_api_key {
        Some(key) => key.clone(),
        None => {
            tracing::warn!("LLM_API_KEY is not set; AI replies will surface provider errors");
            String::new()
        }
    };
    let provider = OpenAiCompatService::new(
        api_key,
        config.llm_base_url.clone(),
        config.llm_model.clone(),
    )?;
    tracing::info!(model = %config.llm_model, "LLM provider initialized");
    let chat = Arc::new(LoggingService::new(Arc::new(provider)));
    let gateway = Arc::new(LlmGateway::new(chat, db.clone()));

    // Outbound channels; credential fields decrypt only inside the sender
    let cipher = TokenCipher::from_secret(&config.encryption_key);
    let whatsapp = WhatsAppSender::new(
        db.clone(),
        cipher.clone(),
        config.whatsapp_api_token.clone(),
        config.whatsapp_phone_number_id.clone(),
    );
    let outbound = Arc::new(ChannelSender::new(db.clone(), whatsapp));

    // Engine + worker pool (requeues tasks interrupted by a previous run)
    let engine = Engine::new(db.clone(), gateway, outbound);
    engine.start_workers(WORKER_COUNT);

    // HTTP surface
    let state = AppState::new(engine, db, cipher, &config);
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Flowline server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
