//! Environment-driven configuration

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the sqlite database file
    pub db_path: String,
    /// HTTP listen port
    pub port: u16,
    /// API key for the LLM provider
    pub llm_api_key: Option<String>,
    /// OpenAI-compatible chat-completions endpoint
    pub llm_base_url: String,
    /// Model identifier sent to the provider
    pub llm_model: String,
    /// Token Meta presents during webhook verification
    pub whatsapp_verify_token: String,
    /// Global fallback WhatsApp credentials (tenants may override)
    pub whatsapp_api_token: Option<String>,
    pub whatsapp_phone_number_id: Option<String>,
    /// Secret used to derive the credential-encryption key
    pub encryption_key: String,
    /// Base URL of the dashboard frontend, linked from subscription notices
    pub frontend_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        let db_path = std::env::var("FLOWLINE_DB_PATH").unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            format!("{home}/.flowline/flowline.db")
        });

        let port = std::env::var("FLOWLINE_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8000);

        Self {
            db_path,
            port,
            llm_api_key: std::env::var("LLM_API_KEY").ok(),
            llm_base_url: std::env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://openrouter.ai/api/v1/chat/completions".to_string()),
            llm_model: std::env::var("LLM_MODEL")
                .unwrap_or_else(|_| "deepseek/deepseek-chat".to_string()),
            whatsapp_verify_token: std::env::var("WHATSAPP_VERIFY_TOKEN")
                .unwrap_or_else(|_| "flowline_secret_token".to_string()),
            whatsapp_api_token: std::env::var("WHATSAPP_API_TOKEN").ok(),
            whatsapp_phone_number_id: std::env::var("WHATSAPP_PHONE_NUMBER_ID").ok(),
            encryption_key: std::env::var("FLOWLINE_ENCRYPTION_KEY")
                .unwrap_or_else(|_| "fallback-secret-key-at-least-32-chars-long".to_string()),
            frontend_url: std::env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
        }
    }
}
