use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{Instrument, Level};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::error::GatewayError;
use crate::middleware::{Middleware, MiddlewareHandler};
use crate::utils::duration_to_millis;

/// Initialize the tracing system. `RUST_LOG` wins over `log_level` when set.
pub fn init_tracing(log_level: &str, json_format: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        match log_level {
            "trace" | "debug" | "info" | "warn" | "error" => EnvFilter::new(log_level),
            _ => EnvFilter::new("info"),
        }
    });

    let base = fmt::layer()
        .with_target(true)
        .with_timer(ChronoUtc::rfc_3339());

    // try_init so tests and embedders that already installed a subscriber keep theirs
    let result = if json_format {
        Registry::default().with(env_filter).with(base.json()).try_init()
    } else {
        Registry::default().with(env_filter).with(base).try_init()
    };

    match result {
        Ok(()) => tracing::info!(json_format, "Tracing initialized"),
        Err(err) => tracing::debug!(error = %err, "Tracing already initialized"),
    }
}

/// Request/response logging. Opens a span per request and records the
/// outcome; credentials are never written to the log.
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn process_request(
        &self,
        request: GatewayRequest,
        next: Arc<dyn MiddlewareHandler>,
    ) -> Result<GatewayResponse, GatewayError> {
        let span = tracing::span!(
            Level::INFO,
            "request",
            request_id = %request.request_id,
            method = %request.method,
            path = %request.uri.path(),
            client = %request.client_key(),
        );

        async move {
            let start = Instant::now();
            tracing::info!(
                query = ?request.uri.query(),
                has_authorization = request.headers.contains_key(hyper::header::AUTHORIZATION),
                body_size = request.body.len(),
                "Request received"
            );

            let request_id = request.request_id.clone();
            let result = next.handle(request).await;
            let elapsed_ms = duration_to_millis(start.elapsed());

            match &result {
                Ok(response) if response.status.is_server_error() => {
                    tracing::error!(
                        status = response.status.as_u16(),
                        upstream = ?response.upstream,
                        elapsed_ms,
                        "Request failed"
                    );
                }
                Ok(response) if response.status.is_client_error() => {
                    tracing::warn!(
                        status = response.status.as_u16(),
                        upstream = ?response.upstream,
                        elapsed_ms,
                        "Request completed with error status"
                    );
                }
                Ok(response) => {
                    tracing::info!(
                        status = response.status.as_u16(),
                        upstream = ?response.upstream,
                        upstream_ms = response.processing_time_ms,
                        elapsed_ms,
                        "Request completed"
                    );
                }
                Err(error) => log_error(error, &request_id, elapsed_ms),
            }

            result
        }
        .instrument(span)
        .await
    }

    fn name(&self) -> &str {
        "logging"
    }
}

/// Log a request that ended in a gateway error. Server-side failures log at
/// ERROR, client-caused rejections at WARN.
pub fn log_error(error: &GatewayError, request_id: &str, elapsed_ms: u64) {
    let status = error.status_code().as_u16();

    if error.status_code().is_server_error() {
        tracing::error!(request_id, status, elapsed_ms, error = %error, "Request failed");
    } else {
        tracing::warn!(request_id, status, elapsed_ms, error = %error, "Request rejected");
    }
}

/// Log a security event
pub fn log_security_event(event_type: &str, request_id: &str, details: &str, severity: &str) {
    tracing::warn!(
        event_type = event_type,
        request_id = request_id,
        details = details,
        severity = severity,
        "Security event: {}",
        event_type
    );
}
