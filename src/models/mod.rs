// Models for the API Gateway

use serde::{Deserialize, Serialize};

/// Upstream service definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upstream {
    /// Logical service name
    pub name: String,

    /// Base URL without a trailing slash
    pub base_url: String,
}

impl Upstream {
    pub fn new(name: impl Into<String>, base_url: impl AsRef<str>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.as_ref().trim_end_matches('/').to_string(),
        }
    }
}

/// Route definition in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDefinition {
    /// Path prefix below the API prefix, e.g. `/users`
    pub prefix: String,

    /// Name of the upstream that owns this prefix
    pub upstream: String,

    /// Whether a valid bearer token is required
    #[serde(default)]
    pub protected: bool,

    /// Path prefix on the upstream; defaults to API prefix + route prefix
    #[serde(default)]
    pub upstream_path: Option<String>,

    /// Per-route upstream timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl RouteDefinition {
    pub fn new(prefix: &str, upstream: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            upstream: upstream.to_string(),
            protected: false,
            upstream_path: None,
            timeout_ms: None,
        }
    }

    pub fn protected(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }

    pub fn with_upstream_path(mut self, path: &str) -> Self {
        self.upstream_path = Some(path.to_string());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Identity attached to a request once its bearer token has been validated
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthContext {
    pub subject_id: String,
    pub username: String,
    pub email: String,
    pub issued_at: Option<u64>,
    pub expires_at: u64,
}
