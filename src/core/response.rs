use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use hyper::{HeaderMap, StatusCode};

use crate::error::{retry_after_secs, GatewayError};

/// Represents a response from the API Gateway
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    /// HTTP status code
    pub status: StatusCode,

    /// HTTP headers
    pub headers: HeaderMap,

    /// Response body
    pub body: Bytes,

    /// Upstream service that produced the response (if applicable)
    pub upstream: Option<String>,

    /// Time taken to process the request in milliseconds
    pub processing_time_ms: u64,
}

impl GatewayResponse {
    /// Create a new GatewayResponse
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            upstream: None,
            processing_time_ms: 0,
        }
    }

    /// Render a gateway error as a `{ "message": ... }` JSON response.
    /// Rate-limit rejections also carry `Retry-After`.
    pub fn from_error(error: &GatewayError) -> Self {
        let body = serde_json::json!({ "message": error.client_message() }).to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let GatewayError::RateLimited { retry_after } = error {
            headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs(*retry_after)));
        }

        Self::new(error.status_code(), headers, Bytes::from(body))
    }

    /// Set upstream name for this response
    pub fn with_upstream(mut self, upstream: String) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Set processing time for this response
    pub fn with_processing_time(mut self, processing_time_ms: u64) -> Self {
        self.processing_time_ms = processing_time_ms;
        self
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.body).into_response();
        // Replaces the default octet-stream type set for a Bytes body
        response.headers_mut().remove(CONTENT_TYPE);
        response.headers_mut().extend(self.headers);
        response
    }
}
