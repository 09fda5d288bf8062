//! Error types for the HTTP transport.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

use autofix_core::{DiagnosisErrorKind, DiagnosisResult};

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    /// Body could not be parsed into the expected request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Provider credential is absent.
    #[error("{0}")]
    MissingCredential(String),

    /// Provider did not answer in time.
    #[error("{0}")]
    UpstreamTimeout(String),

    /// Provider answered with an error or could not be reached.
    #[error("{0}")]
    Upstream(String),

    #[error("Rate limit exceeded. Try again later.")]
    RateLimited,

    /// WebSocket capacity reached.
    #[error("{0}")]
    Overloaded(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Maps a failed diagnosis onto the matching transport error.
    pub fn from_diagnosis(result: &DiagnosisResult) -> Self {
        let message = result
            .error_message
            .clone()
            .unwrap_or_else(|| "Diagnosis failed".to_string());
        match result.error_kind {
            Some(DiagnosisErrorKind::MissingCredential) => Self::MissingCredential(message),
            Some(DiagnosisErrorKind::Timeout) => Self::UpstreamTimeout(message),
            _ => Self::Upstream(message),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) | ServerError::MissingCredential(_) => 400,
            ServerError::RateLimited => 429,
            ServerError::Upstream(_) => 502,
            ServerError::Overloaded(_) => 503,
            ServerError::UpstreamTimeout(_) => 504,
            ServerError::Config(_) | ServerError::Internal(_) => 500,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "invalid_request",
            ServerError::MissingCredential(_) => "missing_credential",
            ServerError::UpstreamTimeout(_) => "upstream_timeout",
            ServerError::Upstream(_) => "upstream_error",
            ServerError::RateLimited => "rate_limited",
            ServerError::Overloaded(_) => "overloaded",
            ServerError::Config(_) => "config_error",
            ServerError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            log::error!("{} ({}): {}", status, self.error_type(), self);
        } else {
            log::warn!("{} ({}): {}", status, self.error_type(), self);
        }

        (
            status,
            Json(json!({
                "error": self.to_string(),
                "type": self.error_type(),
            })),
        )
            .into_response()
    }
}
