// API Gateway Library

pub mod config;
pub mod core;
pub mod error;
pub mod middleware;
pub mod models;
pub mod utils;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types
pub use config::GatewayConfig;
pub use error::{AuthError, ConfigError, GatewayError};
pub use models::{AuthContext, RouteDefinition, Upstream};
pub use core::{
    forwarder::{ForwardedRequest, Forwarder},
    gateway::{ApiGateway, Gateway},
    registry::UpstreamRegistry,
    request::GatewayRequest,
    response::GatewayResponse,
    router::{PrefixRouter, Route, RouteMatch, Router},
};
pub use middleware::{Middleware, MiddlewareChain, MiddlewareHandler};
