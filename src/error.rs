use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Staging failed: {0}")]
    Staging(#[from] anyhow::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{message}")]
    Rejected { status: StatusCode, message: String },

    #[error("Upstream API error: {message}")]
    Upstream { message: String },

    #[error("Upstream rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) | GatewayError::Json(_) | GatewayError::Csv(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::Rejected { status, .. } => *status,
            GatewayError::Http(_) | GatewayError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
