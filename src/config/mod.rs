use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use hyper::header::HeaderValue;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::RouteDefinition;
use crate::utils::upstream_name_from_env_key;

/// Secret used when `JWT_SECRET` is not set. Shared with the identity service defaults.
pub const DEFAULT_JWT_SECRET: &str = "your-secret-key-change-this-in-production";

pub const USER_SERVICE: &str = "user-service";
pub const PRODUCT_SERVICE: &str = "product-service";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret shared with the identity service
    pub jwt_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Fixed window length in seconds
    pub window_secs: u64,

    /// Requests admitted per client per window
    pub max_requests: u32,

    /// Use the rightmost `X-Forwarded-For` entry as the client key
    pub trust_proxy_headers: bool,

    /// How often idle buckets are purged, in seconds
    pub cleanup_interval_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_requests: 100,
            trust_proxy_headers: false,
            cleanup_interval_secs: 60,
        }
    }
}

/// Forwarding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Reserved prefix in front of every route, e.g. `/api`
    pub api_prefix: String,

    /// Upstream timeout in milliseconds
    pub timeout_ms: u64,

    /// Largest inbound request body accepted, in bytes
    pub max_body_bytes: usize,
}

impl ProxyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            api_prefix: "/api".to_string(),
            timeout_ms: 5000,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:4200".to_string(),
                "http://localhost:4201".to_string(),
                "http://localhost:4202".to_string(),
            ],
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Whether to log in JSON format
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub proxy: ProxyConfig,
    pub cors: CorsConfig,
    pub logging: LoggingConfig,

    /// Upstream name to base URL
    pub upstreams: BTreeMap<String, String>,

    /// Routes below the API prefix
    pub routes: Vec<RouteDefinition>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let mut upstreams = BTreeMap::new();
        upstreams.insert(USER_SERVICE.to_string(), "http://localhost:3001".to_string());
        upstreams.insert(PRODUCT_SERVICE.to_string(), "http://localhost:3002".to_string());

        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            proxy: ProxyConfig::default(),
            cors: CorsConfig::default(),
            logging: LoggingConfig::default(),
            upstreams,
            routes: default_routes(),
        }
    }
}

/// `/auth` stays open so clients can log in; the rest needs a token.
pub fn default_routes() -> Vec<RouteDefinition> {
    vec![
        RouteDefinition::new("/auth", USER_SERVICE),
        RouteDefinition::new("/users", USER_SERVICE).protected(true),
        RouteDefinition::new("/products", PRODUCT_SERVICE).protected(true),
    ]
}

impl GatewayConfig {
    /// Load configuration: defaults, then the YAML file named by `GATEWAY_CONFIG`,
    /// then environment overrides. A `.env` file is read first if present.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = match std::env::var("GATEWAY_CONFIG") {
            Ok(path) => Self::from_yaml_file(path)?,
            Err(_) => Self::default(),
        };

        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML configuration file. Missing sections keep their defaults.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::LoadError(format!("cannot read {}: {}", path.display(), e))
        })?;

        serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::LoadError(format!("cannot parse {}: {}", path.display(), e))
        })
    }

    /// Apply environment-style overrides
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        if let Some(host) = get("HOST") {
            self.server.host = host.to_string();
        }
        if let Some(port) = get("PORT") {
            self.server.port = parse_var("PORT", port)?;
        }
        if let Some(secret) = get("JWT_SECRET") {
            self.auth.jwt_secret = secret.to_string();
        }
        if let Some(url) = get("USER_SERVICE_URL") {
            self.upstreams.insert(USER_SERVICE.to_string(), url.to_string());
        }
        if let Some(url) = get("PRODUCT_SERVICE_URL") {
            self.upstreams.insert(PRODUCT_SERVICE.to_string(), url.to_string());
        }
        for (key, value) in &vars {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            if let Some(name) = upstream_name_from_env_key(key) {
                self.upstreams.insert(name, value.to_string());
            }
        }
        if let Some(timeout) = get("UPSTREAM_TIMEOUT_MS") {
            self.proxy.timeout_ms = parse_var("UPSTREAM_TIMEOUT_MS", timeout)?;
        }
        if let Some(max_body) = get("MAX_BODY_BYTES") {
            self.proxy.max_body_bytes = parse_var("MAX_BODY_BYTES", max_body)?;
        }
        if let Some(window) = get("RATE_LIMIT_WINDOW_SECS") {
            self.rate_limit.window_secs = parse_var("RATE_LIMIT_WINDOW_SECS", window)?;
        }
        if let Some(limit) = get("RATE_LIMIT_MAX_REQUESTS") {
            self.rate_limit.max_requests = parse_var("RATE_LIMIT_MAX_REQUESTS", limit)?;
        }
        if let Some(trust) = get("TRUST_PROXY_HEADERS") {
            self.rate_limit.trust_proxy_headers = parse_bool("TRUST_PROXY_HEADERS", trust)?;
        }
        if let Some(origins) = get("CORS_ORIGINS") {
            self.cors.allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.logging.level = level.to_string();
        }
        if let Some(format) = get("LOG_FORMAT") {
            self.logging.json_format = format.eq_ignore_ascii_case("json");
        }

        Ok(())
    }

    /// Check invariants that must hold before the gateway is built
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::ValidationError("JWT secret must not be empty".to_string()));
        }
        if self.rate_limit.window_secs == 0 || self.rate_limit.max_requests == 0 {
            return Err(ConfigError::ValidationError(
                "rate limit window and max requests must be positive".to_string(),
            ));
        }
        if self.proxy.timeout_ms == 0 {
            return Err(ConfigError::ValidationError("upstream timeout must be positive".to_string()));
        }
        if self.proxy.max_body_bytes == 0 {
            return Err(ConfigError::ValidationError("max body size must be positive".to_string()));
        }
        if !self.proxy.api_prefix.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "API prefix '{}' must start with '/'",
                self.proxy.api_prefix
            )));
        }

        for (name, url) in &self.upstreams {
            validate_upstream_url(name, url)?;
        }

        let mut seen = HashSet::new();
        for route in &self.routes {
            let prefix = route.prefix.trim_end_matches('/');
            if !route.prefix.starts_with('/') || prefix.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "route prefix '{}' must be an absolute path below the API prefix",
                    route.prefix
                )));
            }
            if !seen.insert(prefix.to_string()) {
                return Err(ConfigError::DuplicateRoute(route.prefix.clone()));
            }
        }

        for origin in &self.cors.allowed_origins {
            HeaderValue::from_str(origin).map_err(|_| {
                ConfigError::ValidationError(format!("invalid CORS origin '{}'", origin))
            })?;
        }

        Ok(())
    }

    pub fn uses_default_secret(&self) -> bool {
        self.auth.jwt_secret == DEFAULT_JWT_SECRET
    }
}

fn validate_upstream_url(name: &str, url: &str) -> Result<(), ConfigError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| ConfigError::InvalidUpstreamUrl {
        name: name.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUpstreamUrl {
            name: name.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }

    Ok(())
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{} has invalid value '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::ValidationError(format!(
            "{} has invalid value '{}'",
            key, value
        ))),
    }
}
