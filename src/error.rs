use std::io;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Error type for startup and configuration failures
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Failed to bind {address}: {source}")]
    BindError {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Logging setup failed: {0}")]
    LoggingError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

/// Helper type for Results that use DeployError
pub type Result<T> = std::result::Result<T, DeployError>;

/// Rejections produced while handling a webhook delivery.
///
/// The `Display` text is what the caller sees in the `detail` field, so it
/// must never carry the secret, the expected signature or payload contents.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Webhook secret not configured")]
    SecretNotConfigured,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid JSON payload")]
    MalformedPayload(#[source] serde_json::Error),
}

impl WebhookError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::SecretNotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
            WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
            WebhookError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(json!({ "detail": self.to_string() })),
        )
            .into_response()
    }
}
