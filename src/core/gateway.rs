use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::rejection::BytesRejection;
use axum::extract::{ConnectInfo, DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use bytes::Bytes;
use futures::FutureExt;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::json;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::core::forwarder::{ForwardedRequest, Forwarder};
use crate::core::registry::UpstreamRegistry;
use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::core::router::{PrefixRouter, Router};
use crate::error::GatewayError;
use crate::middleware::auth::AuthMiddleware;
use crate::middleware::logging::LoggingMiddleware;
use crate::middleware::rate_limit::{FixedWindowRateLimiter, RateLimitMiddleware};
use crate::middleware::{FinalHandler, MiddlewareChain, MiddlewareHandler};
use crate::utils::client_ip;

/// Core API Gateway trait that defines the main functionality
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Run a request through the full pipeline
    async fn process_request(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError>;

    /// Start serving; returns the bound address
    async fn start(&self) -> Result<SocketAddr, GatewayError>;

    /// Stop the gateway gracefully
    async fn stop(&self) -> Result<(), GatewayError>;

    /// Check if the gateway is running
    async fn health_check(&self) -> bool;
}

/// Server state that can be mutated
#[derive(Default)]
struct ServerState {
    server_handle: Option<JoinHandle<()>>,
    purge_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

/// API gateway: rate limit, authenticate, match, forward.
///
/// Everything is built once in [`ApiGateway::from_config`] and shared
/// read-only afterwards, apart from the limiter's bucket table.
#[derive(Clone)]
pub struct ApiGateway {
    config: Arc<GatewayConfig>,
    registry: Arc<UpstreamRegistry>,
    router: Arc<dyn Router>,
    limiter: Arc<FixedWindowRateLimiter>,
    pipeline: Arc<dyn MiddlewareHandler>,
    server_state: Arc<Mutex<ServerState>>,
}

impl ApiGateway {
    /// Build the registry, route table, limiter, guard and forwarder from config
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        config.validate()?;

        let registry = Arc::new(UpstreamRegistry::from_entries(config.upstreams.iter())?);
        let router: Arc<dyn Router> = Arc::new(PrefixRouter::new(
            &config.proxy.api_prefix,
            &config.routes,
            &registry,
        )?);
        let forwarder = Forwarder::new(config.proxy.timeout())?;
        let limiter = Arc::new(FixedWindowRateLimiter::new(
            config.rate_limit.max_requests,
            config.rate_limit.window(),
        ));

        let final_handler = {
            let router = router.clone();
            let registry = registry.clone();
            FinalHandler::new(move |request: GatewayRequest| {
                let router = router.clone();
                let registry = registry.clone();
                let forwarder = forwarder.clone();
                async move { route_and_forward(router.as_ref(), &registry, &forwarder, request).await }.boxed()
            })
        };

        let chain = MiddlewareChain::new()
            .with(LoggingMiddleware::new())
            .with(RateLimitMiddleware::new(limiter.clone()))
            .with(AuthMiddleware::new(config.auth.jwt_secret.clone(), router.clone()));

        tracing::info!(
            upstreams = registry.len(),
            routes = router.routes().len(),
            middlewares = ?chain.names(),
            "Gateway pipeline built"
        );

        Ok(Self {
            config: Arc::new(config.clone()),
            registry,
            router,
            limiter,
            pipeline: chain.build(Arc::new(final_handler)),
            server_state: Arc::new(Mutex::new(ServerState::default())),
        })
    }

    /// The HTTP surface: `/health` plus a catch-all proxy, with tracing, CORS
    /// and an inbound body cap
    pub fn app(&self) -> axum::Router {
        let origins: Vec<HeaderValue> = self
            .config
            .cors
            .allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect();

        let cors = CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_credentials(true)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([CONTENT_TYPE, AUTHORIZATION]);

        axum::Router::new()
            .route("/health", get(health_handler))
            .fallback(proxy_handler)
            .with_state(self.clone())
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors)
                    .layer(DefaultBodyLimit::max(self.config.proxy.max_body_bytes)),
            )
    }

    fn bind_addr(&self) -> Result<SocketAddr, GatewayError> {
        format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .map_err(|e| GatewayError::Internal(format!("Invalid address: {}", e)))
    }

    fn spawn_purge_task(&self) -> JoinHandle<()> {
        let limiter = self.limiter.clone();
        let period = Duration::from_secs(self.config.rate_limit.cleanup_interval_secs.max(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = limiter.purge_expired(Instant::now());
                if removed > 0 {
                    tracing::debug!(removed, tracked = limiter.tracked_clients(), "Purged idle rate-limit buckets");
                }
            }
        })
    }
}

/// Final pipeline stage: match the route, resolve its upstream and forward
async fn route_and_forward(
    router: &dyn Router,
    registry: &UpstreamRegistry,
    forwarder: &Forwarder,
    request: GatewayRequest,
) -> Result<GatewayResponse, GatewayError> {
    let raw_path = request
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| request.uri.path());

    let matched = router.find_route(raw_path)?;
    let base_url = registry.resolve(&matched.route.upstream)?;

    let forwarded = ForwardedRequest::from_inbound(&request, base_url, &matched.rewritten_path)
        .with_timeout(matched.route.timeout);

    let response = forwarder.forward(forwarded).await?;
    Ok(response.with_upstream(matched.route.upstream.clone()))
}

async fn health_handler(State(gateway): State<ApiGateway>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "upstreams": gateway.registry.len(),
    }))
}

async fn proxy_handler(
    State(gateway): State<ApiGateway>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(bytes) => bytes,
        Err(rejection) => {
            let status = rejection.into_response().status();
            if status == StatusCode::PAYLOAD_TOO_LARGE {
                let limit = gateway.config.proxy.max_body_bytes;
                tracing::warn!(%method, path = %uri.path(), limit, "Request body too large");
                return GatewayError::PayloadTooLarge { limit }.into_response();
            }
            tracing::warn!(%status, "Failed to read request body");
            return GatewayError::InvalidRequest("Failed to read request body".to_string()).into_response();
        }
    };

    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let client = client_ip(&headers, peer, gateway.config.rate_limit.trust_proxy_headers);
    let request = GatewayRequest::new(method, uri, headers, body, client);

    match gateway.process_request(request).await {
        Ok(response) => response.into_response(),
        Err(err) => err.into_response(),
    }
}

#[async_trait]
impl Gateway for ApiGateway {
    async fn process_request(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        self.pipeline.handle(request).await
    }

    async fn start(&self) -> Result<SocketAddr, GatewayError> {
        let mut server_state = self.server_state.lock().await;
        if server_state.server_handle.is_some() {
            return Err(GatewayError::Internal("Server is already running".to_string()));
        }

        let addr = self.bind_addr()?;
        let server = axum::Server::try_bind(&addr)
            .map_err(|e| GatewayError::Internal(format!("Failed to bind {}: {}", addr, e)))?
            .serve(self.app().into_make_service_with_connect_info::<SocketAddr>());
        let local_addr = server.local_addr();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let graceful = server.with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("Shutdown signal received, starting graceful shutdown");
        });

        let server_handle = tokio::spawn(async move {
            if let Err(e) = graceful.await {
                tracing::error!("Server error: {}", e);
            }
            tracing::info!("Server on {} has been shut down", local_addr);
        });

        server_state.server_handle = Some(server_handle);
        server_state.purge_handle = Some(self.spawn_purge_task());
        server_state.shutdown_tx = Some(shutdown_tx);

        tracing::info!(%local_addr, "API Gateway listening");
        Ok(local_addr)
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        let mut server_state = self.server_state.lock().await;

        let handle = server_state
            .server_handle
            .take()
            .ok_or_else(|| GatewayError::Internal("Server is not running".to_string()))?;

        if let Some(tx) = server_state.shutdown_tx.take() {
            // receiver may already be gone if the server failed
            let _ = tx.send(());
        }
        if let Some(purge) = server_state.purge_handle.take() {
            purge.abort();
        }

        handle.await.map_err(|e| {
            tracing::error!("Error while shutting down server: {}", e);
            GatewayError::Internal(format!("Error while shutting down server: {}", e))
        })?;

        tracing::info!("Server has been shut down gracefully");
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.server_state.lock().await.server_handle.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{now_secs, sign_token, spawn_backend, unused_addr};
    use axum::body::Body;
    use axum::http::Request;
    use std::net::{IpAddr, Ipv4Addr};
    use tower::ServiceExt;

    const SECRET: &str = "gateway-test-secret";

    fn config(users: SocketAddr, products: SocketAddr) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.auth.jwt_secret = SECRET.to_string();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0;
        config
            .upstreams
            .insert("user-service".to_string(), format!("http://{}", users));
        config
            .upstreams
            .insert("product-service".to_string(), format!("http://{}", products));
        config
    }

    fn request(uri: &'static str, headers: HeaderMap) -> GatewayRequest {
        GatewayRequest::new(
            Method::GET,
            Uri::from_static(uri),
            headers,
            Bytes::new(),
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        )
    }

    #[test]
    fn test_unknown_upstream_fails_construction() {
        let mut config = config(unused_addr(), unused_addr());
        config.upstreams.remove("product-service");

        let result = ApiGateway::from_config(&config);
        assert!(matches!(result, Err(GatewayError::UnknownUpstream(name)) if name == "product-service"));
    }

    #[tokio::test]
    async fn test_pipeline_forwards_protected_request() {
        let products = spawn_backend(axum::Router::new().route(
            "/api/products",
            get(|uri: Uri| async move { format!("products {}", uri) }),
        ))
        .await;
        let gateway = ApiGateway::from_config(&config(unused_addr(), products)).unwrap();

        let now = now_secs();
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", sign_token(SECRET, json!(1), now, now + 60))).unwrap(),
        );

        let response = gateway
            .process_request(request("/api/products?page=2", headers))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, Bytes::from("products /api/products?page=2"));
        assert_eq!(response.upstream.as_deref(), Some("product-service"));
        assert_eq!(response.headers.get("x-ratelimit-remaining").unwrap(), "99");
    }

    #[tokio::test]
    async fn test_rate_limit_runs_before_auth() {
        let mut config = config(unused_addr(), unused_addr());
        config.rate_limit.max_requests = 1;
        let gateway = ApiGateway::from_config(&config).unwrap();

        let first = gateway
            .process_request(request("/api/users", HeaderMap::new()))
            .await
            .unwrap();
        assert_eq!(first.status, StatusCode::UNAUTHORIZED);
        assert_eq!(first.headers.get("x-ratelimit-remaining").unwrap(), "0");

        let second = gateway.process_request(request("/api/users", HeaderMap::new())).await;
        assert!(matches!(second, Err(GatewayError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn test_unmatched_path_is_not_found() {
        let gateway = ApiGateway::from_config(&config(unused_addr(), unused_addr())).unwrap();

        let response = gateway
            .process_request(request("/api/orders/1", HeaderMap::new()))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(response.upstream.is_none());
        assert_eq!(response.headers.get("x-ratelimit-limit").unwrap(), "100");
        assert_eq!(response.headers.get("x-ratelimit-remaining").unwrap(), "99");

        let json: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(json["message"], "Not Found");
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected_before_the_pipeline() {
        let users = spawn_backend(axum::Router::new().route(
            "/api/auth/login",
            axum::routing::post(|| async { "logged in" }),
        ))
        .await;
        let mut config = config(users, unused_addr());
        config.proxy.max_body_bytes = 16;
        let app = ApiGateway::from_config(&config).unwrap().app();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/auth/login")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(vec![b'a'; 64]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], "Request body too large");

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/auth/login")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_app_serves_health_and_errors() {
        let gateway = ApiGateway::from_config(&config(unused_addr(), unused_addr())).unwrap();
        let app = gateway.app();

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");

        let response = app
            .oneshot(Request::builder().uri("/api/auth/login").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["message"].is_string());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let gateway = ApiGateway::from_config(&config(unused_addr(), unused_addr())).unwrap();
        assert!(!gateway.health_check().await);

        let addr = gateway.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(gateway.health_check().await);
        assert!(gateway.start().await.is_err());

        let body = reqwest::get(format!("http://{}/health", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("\"ok\""));

        gateway.stop().await.unwrap();
        assert!(!gateway.health_check().await);
        assert!(gateway.stop().await.is_err());
    }
}
