use std::net::IpAddr;

use bytes::Bytes;
use hyper::{HeaderMap, Method, Uri};
use uuid::Uuid;

use crate::models::AuthContext;

/// Represents a request to the API Gateway
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// HTTP method
    pub method: Method,

    /// Request URI (path and query as received)
    pub uri: Uri,

    /// HTTP headers
    pub headers: HeaderMap,

    /// Request body, empty when the client sent none
    pub body: Bytes,

    /// Client IP address
    pub client_ip: Option<IpAddr>,

    /// Request ID for tracing
    pub request_id: String,

    /// Identity established by the auth guard
    pub auth_context: Option<AuthContext>,
}

impl GatewayRequest {
    /// Create a new GatewayRequest
    pub fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        client_ip: Option<IpAddr>,
    ) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
            client_ip,
            request_id: Uuid::new_v4().to_string(),
            auth_context: None,
        }
    }

    /// Key the rate limiter buckets this request under
    pub fn client_key(&self) -> String {
        self.client_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Attach the identity produced by the auth guard
    pub fn with_auth_context(mut self, context: AuthContext) -> Self {
        self.auth_context = Some(context);
        self
    }
}
