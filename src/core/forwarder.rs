use std::time::{Duration, Instant};

use bytes::Bytes;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{HeaderMap, Method};

use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::error::GatewayError;
use crate::utils::duration_to_millis;

/// Inbound headers copied to the upstream request
const FORWARDED_HEADERS: [hyper::header::HeaderName; 2] = [CONTENT_TYPE, AUTHORIZATION];

/// Request as it is sent to an upstream
#[derive(Debug, Clone)]
pub struct ForwardedRequest {
    pub method: Method,
    pub target_url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub timeout: Option<Duration>,
}

impl ForwardedRequest {
    /// Derive the upstream request from an inbound one
    pub fn from_inbound(request: &GatewayRequest, base_url: &str, rewritten_path: &str) -> Self {
        let mut headers = HeaderMap::new();
        for name in FORWARDED_HEADERS {
            if let Some(value) = request.headers.get(&name) {
                headers.insert(name, value.clone());
            }
        }

        Self {
            method: request.method.clone(),
            target_url: format!("{}{}", base_url, rewritten_path),
            headers,
            body: request.body.clone(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Single-attempt HTTP forwarder shared by every route
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl Forwarder {
    /// Create a forwarder whose calls are bounded by `default_timeout`
    pub fn new(default_timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(default_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| GatewayError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            default_timeout,
        })
    }

    /// Send the request once and relay status, content type and body verbatim.
    ///
    /// Upstream error statuses come back as `Ok`; only transport failures are `Err`.
    pub async fn forward(&self, request: ForwardedRequest) -> Result<GatewayResponse, GatewayError> {
        let ForwardedRequest {
            method,
            target_url,
            headers,
            body,
            timeout,
        } = request;

        let timeout = timeout.unwrap_or(self.default_timeout);
        let start = Instant::now();

        tracing::debug!(%method, url = %target_url, timeout_ms = duration_to_millis(timeout), "Forwarding request");

        let mut builder = self
            .client
            .request(method, &target_url)
            .timeout(timeout)
            .headers(headers);

        if !body.is_empty() {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| upstream_error(&target_url, e))?;

        let status = response.status();
        let content_type = response.headers().get(CONTENT_TYPE).cloned();
        let body = response
            .bytes()
            .await
            .map_err(|e| upstream_error(&target_url, e))?;

        let mut headers = HeaderMap::new();
        if let Some(content_type) = content_type {
            headers.insert(CONTENT_TYPE, content_type);
        }

        let elapsed_ms = duration_to_millis(start.elapsed());
        tracing::debug!(url = %target_url, status = status.as_u16(), elapsed_ms, "Upstream responded");

        Ok(GatewayResponse::new(status, headers, body).with_processing_time(elapsed_ms))
    }
}

fn upstream_error(target_url: &str, err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        tracing::warn!(url = %target_url, "Upstream timed out");
        GatewayError::UpstreamTimeout
    } else if err.is_connect() {
        tracing::warn!(url = %target_url, error = %err, "Upstream unreachable");
        GatewayError::UpstreamUnreachable(format!("cannot connect to {}: {}", target_url, err))
    } else {
        tracing::warn!(url = %target_url, error = %err, "Upstream request failed");
        GatewayError::UpstreamUnreachable(format!("request to {} failed: {}", target_url, err))
    }
}
