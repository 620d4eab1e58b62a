//! HTTP API
//!
//! Ingress (web chat, WhatsApp webhook) plus the tenant control plane
//! (workflows, executions, CRM, knowledge base, scheduling, channel config).

mod handlers;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::config::Config;
use crate::db::Database;
use crate::engine::Engine;
use crate::security::TokenCipher;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub db: Database,
    pub cipher: TokenCipher,
    pub whatsapp_verify_token: String,
    /// Dashboard base URL, linked from subscription-lapse notices
    pub frontend_url: String,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, db: Database, cipher: TokenCipher, config: &Config) -> Self {
        Self {
            engine,
            db,
            cipher,
            whatsapp_verify_token: config.whatsapp_verify_token.clone(),
            frontend_url: config.frontend_url.clone(),
        }
    }
}
