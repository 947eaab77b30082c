pub mod jwt;

use std::sync::Arc;

use async_trait::async_trait;
use hyper::header::AUTHORIZATION;

use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::core::router::Router;
use crate::error::{AuthError, GatewayError};
use crate::middleware::logging::log_security_event;
use crate::middleware::{Middleware, MiddlewareHandler};

pub use self::jwt::{bearer_token, validate_token, validate_token_at};

/// Authentication middleware. Only routes flagged protected are checked;
/// everything else passes through untouched.
pub struct AuthMiddleware {
    secret: String,
    router: Arc<dyn Router>,
}

impl AuthMiddleware {
    /// Create a new AuthMiddleware validating tokens signed with `secret`
    pub fn new(secret: impl Into<String>, router: Arc<dyn Router>) -> Self {
        Self {
            secret: secret.into(),
            router,
        }
    }

    /// Extract the token from the Authorization header
    fn extract_token(request: &GatewayRequest) -> Option<&str> {
        request
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
    }

    fn authenticate(&self, request: &GatewayRequest) -> Result<crate::models::AuthContext, AuthError> {
        let token = Self::extract_token(request).ok_or(AuthError::MissingToken)?;
        validate_token(&self.secret, token)
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    async fn process_request(
        &self,
        request: GatewayRequest,
        next: Arc<dyn MiddlewareHandler>,
    ) -> Result<GatewayResponse, GatewayError> {
        let raw_path = request
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| request.uri.path());

        if !self.router.is_protected(raw_path) {
            return next.handle(request).await;
        }

        match self.authenticate(&request) {
            Ok(context) => {
                tracing::debug!(
                    subject_id = %context.subject_id,
                    username = %context.username,
                    "Authentication successful"
                );
                next.handle(request.with_auth_context(context)).await
            }
            Err(err) => {
                log_security_event("auth_rejected", &request.request_id, &err.to_string(), "medium");
                Err(GatewayError::Auth(err))
            }
        }
    }

    fn name(&self) -> &str {
        "auth"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_routes;
    use crate::core::registry::UpstreamRegistry;
    use crate::core::router::PrefixRouter;
    use crate::middleware::FinalHandler;
    use crate::test_utils::{now_secs, sign_token};
    use bytes::Bytes;
    use futures::FutureExt;
    use hyper::header::HeaderValue;
    use hyper::{HeaderMap, Method, StatusCode, Uri};
    use serde_json::json;

    const SECRET: &str = "guard-secret";

    fn router() -> Arc<dyn Router> {
        let registry = UpstreamRegistry::from_entries([
            ("user-service", "http://localhost:3001"),
            ("product-service", "http://localhost:3002"),
        ])
        .unwrap();
        Arc::new(PrefixRouter::new("/api", &default_routes(), &registry).unwrap())
    }

    /// Terminal handler that echoes the authenticated subject
    fn echo_subject() -> Arc<dyn MiddlewareHandler> {
        Arc::new(FinalHandler::new(|request: GatewayRequest| {
            async move {
                let subject = request
                    .auth_context
                    .map(|c| c.subject_id)
                    .unwrap_or_else(|| "anonymous".to_string());
                Ok(GatewayResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::from(subject)))
            }
            .boxed()
        }))
    }

    fn request(path: &'static str, authorization: Option<&str>) -> GatewayRequest {
        let mut headers = HeaderMap::new();
        if let Some(value) = authorization {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        }
        GatewayRequest::new(Method::GET, Uri::from_static(path), headers, Bytes::new(), None)
    }

    #[tokio::test]
    async fn test_unprotected_route_skips_guard() {
        let guard = AuthMiddleware::new(SECRET, router());

        let response = guard
            .process_request(request("/api/auth/login", None), echo_subject())
            .await
            .unwrap();

        assert_eq!(response.body, Bytes::from("anonymous"));
    }

    #[tokio::test]
    async fn test_protected_route_without_token() {
        let guard = AuthMiddleware::new(SECRET, router());

        let err = guard
            .process_request(request("/api/users", None), echo_subject())
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Auth(AuthError::MissingToken)));
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_protected_route_with_valid_token_attaches_context() {
        let guard = AuthMiddleware::new(SECRET, router());
        let now = now_secs();
        let token = sign_token(SECRET, json!(5), now, now + 86_400);
        let header = format!("Bearer {}", token);

        let response = guard
            .process_request(request("/api/products?page=1", Some(&header)), echo_subject())
            .await
            .unwrap();

        assert_eq!(response.body, Bytes::from("5"));
    }

    #[tokio::test]
    async fn test_protected_route_with_bad_tokens() {
        let guard = AuthMiddleware::new(SECRET, router());
        let now = now_secs();
        let expired = format!("Bearer {}", sign_token(SECRET, json!(5), now - 100, now - 10));
        let forged = format!("Bearer {}", sign_token("wrong", json!(5), now, now + 100));

        for (header, expected) in [
            (expired.as_str(), AuthError::TokenExpired),
            (forged.as_str(), AuthError::InvalidSignature),
            ("Bearer not-a-jwt", AuthError::TokenMalformed),
            ("Basic dXNlcjpwYXNz", AuthError::MissingToken),
        ] {
            let err = guard
                .process_request(request("/api/users/1", Some(header)), echo_subject())
                .await
                .unwrap_err();

            match err {
                GatewayError::Auth(actual) => assert_eq!(actual, expected),
                other => panic!("expected auth error, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_unmatched_path_is_left_to_router() {
        let guard = AuthMiddleware::new(SECRET, router());

        let response = guard
            .process_request(request("/api/unknown", None), echo_subject())
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
    }
}
