use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::core::response::GatewayResponse;

/// Gateway error types
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Unknown upstream: {0}")]
    UnknownUpstream(String),

    #[error("No route matches {0}")]
    NoMatch(String),

    #[error("{0}")]
    Auth(#[from] AuthError),

    #[error("Too many requests")]
    RateLimited { retry_after: Duration },

    #[error("Upstream service unavailable: {0}")]
    UpstreamUnreachable(String),

    #[error("Upstream service timed out")]
    UpstreamTimeout,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP status code mapping for gateway errors
impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::UnknownUpstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::NoMatch(_) => StatusCode::NOT_FOUND,
            GatewayError::Auth(_) => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout => StatusCode::BAD_GATEWAY,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message exposed to the caller. Internal details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::NoMatch(_) => "Not Found".to_string(),
            GatewayError::Auth(err) => err.to_string(),
            GatewayError::RateLimited { .. } => "Too many requests, please try again later".to_string(),
            GatewayError::UpstreamUnreachable(_) => "Upstream service unavailable".to_string(),
            GatewayError::UpstreamTimeout => "Upstream service timed out".to_string(),
            GatewayError::InvalidRequest(reason) => reason.clone(),
            GatewayError::PayloadTooLarge { .. } => "Request body too large".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        GatewayResponse::from_error(&self).into_response()
    }
}

/// Whole seconds for a `Retry-After` header, rounded up and never zero.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

/// Authentication specific errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Unauthorized")]
    MissingToken,

    #[error("Malformed token")]
    TokenMalformed,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token expired")]
    TokenExpired,
}

/// Configuration specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Invalid upstream URL for '{name}': {reason}")]
    InvalidUpstreamUrl { name: String, reason: String },

    #[error("Duplicate route prefix: {0}")]
    DuplicateRoute(String),
}
