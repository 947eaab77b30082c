use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::core::registry::UpstreamRegistry;
use crate::error::{ConfigError, GatewayError};
use crate::models::RouteDefinition;

/// Compiled route, immutable after startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Full inbound prefix including the API prefix, e.g. `/api/users`
    pub prefix: String,

    /// Upstream that owns this prefix
    pub upstream: String,

    /// Number of leading path segments consumed by the prefix
    pub strip_prefix_segments: usize,

    /// Prefix re-applied on the upstream side
    pub target_prefix: String,

    /// Whether the auth guard runs for this route
    pub protected: bool,

    /// Overrides the forwarder's default timeout
    pub timeout: Option<Duration>,

    segments: Vec<String>,
}

impl Route {
    fn compile(api_prefix: &str, definition: &RouteDefinition) -> Self {
        let api_segments = split_segments(api_prefix);
        let route_segments = split_segments(&definition.prefix);

        let segments: Vec<String> = api_segments
            .into_iter()
            .chain(route_segments)
            .map(str::to_string)
            .collect();

        let prefix = format!("/{}", segments.join("/"));
        let target_prefix = match &definition.upstream_path {
            Some(path) => path.trim_end_matches('/').to_string(),
            None => prefix.clone(),
        };

        Self {
            prefix,
            upstream: definition.upstream.clone(),
            strip_prefix_segments: segments.len(),
            target_prefix,
            protected: definition.protected,
            timeout: definition.timeout_ms.map(Duration::from_millis),
            segments,
        }
    }

    /// Remainder of `path` after this route's segments, or `None` if the
    /// prefix does not match on segment boundaries.
    fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        let mut rest = path;
        for segment in &self.segments {
            rest = rest.trim_start_matches('/');
            let after = rest.strip_prefix(segment.as_str())?;
            if !(after.is_empty() || after.starts_with('/')) {
                return None;
            }
            rest = after;
        }
        Some(rest)
    }

    /// Path on the upstream for the given remainder and query
    fn rewrite(&self, remainder: &str, query: Option<&str>) -> String {
        let mut rewritten = String::with_capacity(self.target_prefix.len() + remainder.len() + 1);
        rewritten.push_str(&self.target_prefix);
        rewritten.push_str(remainder);

        if !rewritten.starts_with('/') {
            rewritten.insert(0, '/');
        }

        if let Some(query) = query {
            rewritten.push('?');
            rewritten.push_str(query);
        }

        rewritten
    }
}

fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Route match result
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// Matched route
    pub route: Arc<Route>,

    /// Upstream path including the original query string
    pub rewritten_path: String,
}

/// Router trait for matching request paths to routes
pub trait Router: Send + Sync {
    /// Find the route owning `raw_path` (path plus optional `?query`)
    fn find_route(&self, raw_path: &str) -> Result<RouteMatch, GatewayError>;

    /// All routes, in matching order
    fn routes(&self) -> &[Arc<Route>];

    /// Whether the route owning `raw_path` requires authentication.
    /// Unmatched paths are not protected; they fail later with 404.
    fn is_protected(&self, raw_path: &str) -> bool {
        self.find_route(raw_path)
            .map(|m| m.route.protected)
            .unwrap_or(false)
    }
}

/// Longest-prefix router over a static route table
#[derive(Debug, Clone)]
pub struct PrefixRouter {
    routes: Vec<Arc<Route>>,
}

impl PrefixRouter {
    /// Compile route definitions, checking every upstream against the registry
    pub fn new(
        api_prefix: &str,
        definitions: &[RouteDefinition],
        registry: &UpstreamRegistry,
    ) -> Result<Self, GatewayError> {
        let mut seen = HashSet::new();
        let mut routes = Vec::with_capacity(definitions.len());

        for definition in definitions {
            if !registry.contains(&definition.upstream) {
                return Err(GatewayError::UnknownUpstream(definition.upstream.clone()));
            }

            let route = Route::compile(api_prefix, definition);
            if !seen.insert(route.prefix.clone()) {
                return Err(ConfigError::DuplicateRoute(route.prefix).into());
            }

            tracing::info!(
                prefix = %route.prefix,
                upstream = %route.upstream,
                target = %route.target_prefix,
                protected = route.protected,
                "Registered route"
            );
            routes.push(Arc::new(route));
        }

        // Longest prefix first
        routes.sort_by(|a, b| b.strip_prefix_segments.cmp(&a.strip_prefix_segments));

        Ok(Self { routes })
    }
}

impl Router for PrefixRouter {
    fn find_route(&self, raw_path: &str) -> Result<RouteMatch, GatewayError> {
        let (path, query) = match raw_path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (raw_path, None),
        };

        for route in &self.routes {
            if let Some(remainder) = route.strip(path) {
                return Ok(RouteMatch {
                    route: route.clone(),
                    rewritten_path: route.rewrite(remainder, query),
                });
            }
        }

        Err(GatewayError::NoMatch(path.to_string()))
    }

    fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_routes;

    fn registry() -> UpstreamRegistry {
        UpstreamRegistry::from_entries([
            ("user-service", "http://localhost:3001"),
            ("product-service", "http://localhost:3002"),
        ])
        .unwrap()
    }

    fn router() -> PrefixRouter {
        PrefixRouter::new("/api", &default_routes(), &registry()).unwrap()
    }

    #[test]
    fn test_matches_each_default_route() {
        let router = router();

        let m = router.find_route("/api/auth/login").unwrap();
        assert_eq!(m.route.upstream, "user-service");
        assert!(!m.route.protected);
        assert_eq!(m.rewritten_path, "/api/auth/login");

        let m = router.find_route("/api/users/42").unwrap();
        assert_eq!(m.route.upstream, "user-service");
        assert!(m.route.protected);
        assert_eq!(m.rewritten_path, "/api/users/42");

        let m = router.find_route("/api/products").unwrap();
        assert_eq!(m.route.upstream, "product-service");
        assert_eq!(m.route.strip_prefix_segments, 2);
        assert_eq!(m.rewritten_path, "/api/products");
    }

    #[test]
    fn test_rewrite_preserves_remainder_and_query() {
        let router = router();
        let remainders = [
            "",
            "/",
            "/42",
            "/42/",
            "//42",
            "/a/b/c",
            "/caf%C3%A9",
            "/x.json",
        ];
        let queries = [None, Some(""), Some("page=2&limit=10"), Some("q=a%20b&q=c")];

        for remainder in remainders {
            for query in queries {
                let mut raw = format!("/api/products{}", remainder);
                if let Some(q) = query {
                    raw.push('?');
                    raw.push_str(q);
                }

                let m = router.find_route(&raw).unwrap();
                assert!(m.rewritten_path.starts_with("/api/products"), "{}", raw);
                assert_eq!(&m.rewritten_path["/api/products".len()..], &raw["/api/products".len()..]);
            }
        }
    }

    #[test]
    fn test_segment_boundary_is_respected() {
        let router = router();

        assert!(matches!(router.find_route("/api/usersx"), Err(GatewayError::NoMatch(_))));
        assert!(matches!(router.find_route("/api/user"), Err(GatewayError::NoMatch(_))));
        assert!(matches!(router.find_route("/apix/users"), Err(GatewayError::NoMatch(_))));
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        let router = router();
        assert!(router.find_route("/api/Users").is_err());
        assert!(router.find_route("/API/users").is_err());
    }

    #[test]
    fn test_unmatched_paths() {
        let router = router();

        for path in ["/", "", "/api", "/api/", "/health", "/users", "/api/orders/1", "/api?x=/api/users"] {
            assert!(
                matches!(router.find_route(path), Err(GatewayError::NoMatch(_))),
                "{} should not match",
                path
            );
        }
    }

    #[test]
    fn test_extra_leading_slashes_do_not_break_matching() {
        let router = router();

        let m = router.find_route("//api//users/5").unwrap();
        assert_eq!(m.route.upstream, "user-service");
        assert_eq!(m.rewritten_path, "/api/users/5");

        let m = router.find_route("///api/auth").unwrap();
        assert_eq!(m.rewritten_path, "/api/auth");
    }

    #[test]
    fn test_bare_root_keeps_query() {
        let m = router().find_route("/api/products?page=2&limit=10").unwrap();
        assert_eq!(m.rewritten_path, "/api/products?page=2&limit=10");
    }

    #[test]
    fn test_longest_prefix_wins() {
        let definitions = vec![
            RouteDefinition::new("/users", "user-service").protected(true),
            RouteDefinition::new("/users/public", "product-service"),
        ];
        let router = PrefixRouter::new("/api", &definitions, &registry()).unwrap();

        let m = router.find_route("/api/users/public/avatars").unwrap();
        assert_eq!(m.route.upstream, "product-service");
        assert_eq!(m.rewritten_path, "/api/users/public/avatars");
        assert!(!router.is_protected("/api/users/public/avatars"));

        let m = router.find_route("/api/users/publicity").unwrap();
        assert_eq!(m.route.upstream, "user-service");
        assert!(router.is_protected("/api/users/publicity"));
    }

    #[test]
    fn test_custom_upstream_path() {
        let definitions = vec![
            RouteDefinition::new("/catalog", "product-service").with_upstream_path("/v2/products/"),
            RouteDefinition::new("/raw", "user-service").with_upstream_path(""),
        ];
        let router = PrefixRouter::new("/api", &definitions, &registry()).unwrap();

        assert_eq!(
            router.find_route("/api/catalog/7?full=1").unwrap().rewritten_path,
            "/v2/products/7?full=1"
        );
        assert_eq!(router.find_route("/api/raw").unwrap().rewritten_path, "/");
        assert_eq!(router.find_route("/api/raw/ping").unwrap().rewritten_path, "/ping");
    }

    #[test]
    fn test_route_timeout_override() {
        let definitions = vec![RouteDefinition::new("/products", "product-service").with_timeout_ms(250)];
        let router = PrefixRouter::new("/api", &definitions, &registry()).unwrap();

        let m = router.find_route("/api/products").unwrap();
        assert_eq!(m.route.timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_unknown_upstream_is_fatal() {
        let definitions = vec![RouteDefinition::new("/orders", "order-service")];

        match PrefixRouter::new("/api", &definitions, &registry()) {
            Err(GatewayError::UnknownUpstream(name)) => assert_eq!(name, "order-service"),
            other => panic!("expected UnknownUpstream, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_prefix_is_rejected() {
        let definitions = vec![
            RouteDefinition::new("/users", "user-service"),
            RouteDefinition::new("//users/", "product-service"),
        ];

        assert!(matches!(
            PrefixRouter::new("/api", &definitions, &registry()),
            Err(GatewayError::Config(ConfigError::DuplicateRoute(_)))
        ));
    }

    #[test]
    fn test_is_protected() {
        let router = router();
        assert!(router.is_protected("/api/users"));
        assert!(router.is_protected("/api/products/1?x=1"));
        assert!(!router.is_protected("/api/auth/login"));
        assert!(!router.is_protected("/api/nothing"));
    }
}
