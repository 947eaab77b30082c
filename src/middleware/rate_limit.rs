use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use hyper::header::HeaderValue;

use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::error::GatewayError;
use crate::middleware::logging::log_security_event;
use crate::middleware::{Middleware, MiddlewareHandler};

/// Per-client counter for the current window
#[derive(Debug, Clone, Copy)]
struct ThrottleBucket {
    window_start: Instant,
    count: u32,
}

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Request admitted; `remaining` more fit in the current window
    Allowed { remaining: u32 },
    /// Window exhausted until `retry_after` has elapsed
    Rejected { retry_after: Duration },
}

/// Fixed-window limiter keyed by client identity.
///
/// The first request from a key opens a window. Once `window` has elapsed
/// since that request, the next one opens a fresh window with a zeroed count.
/// Rejected requests do not count against the window.
#[derive(Debug)]
pub struct FixedWindowRateLimiter {
    limit: u32,
    window: Duration,
    buckets: DashMap<String, ThrottleBucket>,
}

impl FixedWindowRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            buckets: DashMap::new(),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Check and record a request for `key`
    pub fn admit(&self, key: &str) -> Admission {
        self.admit_at(key, Instant::now())
    }

    /// Same as [`admit`](Self::admit) with an explicit clock reading
    pub fn admit_at(&self, key: &str, now: Instant) -> Admission {
        // The entry guard holds the shard lock, so check-and-increment is atomic per key
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert(ThrottleBucket {
                window_start: now,
                count: 0,
            });

        let elapsed = now.saturating_duration_since(bucket.window_start);
        if elapsed >= self.window {
            bucket.window_start = now;
            bucket.count = 0;
        }

        if bucket.count >= self.limit {
            let retry_after = self
                .window
                .saturating_sub(now.saturating_duration_since(bucket.window_start));
            return Admission::Rejected { retry_after };
        }

        bucket.count += 1;
        Admission::Allowed {
            remaining: self.limit - bucket.count,
        }
    }

    /// Drop buckets idle for at least two windows. Returns how many were removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let horizon = self.window * 2;
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.window_start) < horizon);
        before.saturating_sub(self.buckets.len())
    }

    /// Number of clients currently tracked
    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}

/// Rate limiting middleware. Runs before authentication so rejected
/// traffic is never validated or forwarded.
///
/// Every admitted request carries `x-ratelimit-*` headers, including
/// requests that later fail in auth, routing or forwarding. Those failures
/// are rendered into responses here so the headers can be attached.
pub struct RateLimitMiddleware {
    limiter: Arc<FixedWindowRateLimiter>,
}

impl RateLimitMiddleware {
    pub fn new(limiter: Arc<FixedWindowRateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    async fn process_request(
        &self,
        request: GatewayRequest,
        next: Arc<dyn MiddlewareHandler>,
    ) -> Result<GatewayResponse, GatewayError> {
        let key = request.client_key();

        match self.limiter.admit(&key) {
            Admission::Rejected { retry_after } => {
                log_security_event(
                    "rate_limited",
                    &request.request_id,
                    &format!("client {} exceeded {} requests", key, self.limiter.limit()),
                    "low",
                );
                Err(GatewayError::RateLimited { retry_after })
            }
            Admission::Allowed { remaining } => {
                let mut response = match next.handle(request).await {
                    Ok(response) => response,
                    Err(err) => {
                        tracing::debug!(error = %err, "Admitted request failed downstream");
                        GatewayResponse::from_error(&err)
                    }
                };
                response
                    .headers
                    .insert("x-ratelimit-limit", HeaderValue::from(self.limiter.limit()));
                response
                    .headers
                    .insert("x-ratelimit-remaining", HeaderValue::from(remaining));
                Ok(response)
            }
        }
    }

    fn name(&self) -> &str {
        "rate_limit"
    }
}
