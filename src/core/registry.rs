use std::collections::HashMap;

use crate::error::{ConfigError, GatewayError};
use crate::models::Upstream;

/// Read-only map from upstream name to base URL, built once at startup
#[derive(Debug, Clone, Default)]
pub struct UpstreamRegistry {
    upstreams: HashMap<String, Upstream>,
}

impl UpstreamRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from `(name, base_url)` pairs
    pub fn from_entries<I, K, V>(entries: I) -> Result<Self, GatewayError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut registry = Self::new();
        for (name, url) in entries {
            registry.register(Upstream::new(name, url))?;
        }
        Ok(registry)
    }

    /// Register an upstream. Names are unique.
    pub fn register(&mut self, upstream: Upstream) -> Result<(), GatewayError> {
        if self.upstreams.contains_key(&upstream.name) {
            return Err(ConfigError::ValidationError(format!(
                "upstream '{}' registered twice",
                upstream.name
            ))
            .into());
        }

        tracing::debug!(upstream = %upstream.name, base_url = %upstream.base_url, "Registered upstream");
        self.upstreams.insert(upstream.name.clone(), upstream);
        Ok(())
    }

    /// Base URL for a registered upstream
    pub fn resolve(&self, name: &str) -> Result<&str, GatewayError> {
        self.upstreams
            .get(name)
            .map(|u| u.base_url.as_str())
            .ok_or_else(|| GatewayError::UnknownUpstream(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.upstreams.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }
}
