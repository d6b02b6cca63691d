//! Error types for the balance sentinel service

/// Errors that can occur in the balance sentinel service
#[derive(Debug, thiserror::Error)]
pub enum SentinelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Notifier error: {0}")]
    Notifier(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("A scrape cycle is already in progress")]
    Busy,

    #[error("API error: {0}")]
    Api(String),
}

/// Result type alias for balance sentinel operations
pub type Result<T> = std::result::Result<T, SentinelError>;
