use tokio::signal;

use service_gateway::config::GatewayConfig;
use service_gateway::middleware::logging::init_tracing;
use service_gateway::{ApiGateway, Gateway, GatewayError};

#[tokio::main]
async fn main() -> Result<(), GatewayError> {
    let config = GatewayConfig::load()?;

    init_tracing(&config.logging.level, config.logging.json_format);

    if config.uses_default_secret() {
        tracing::warn!("JWT_SECRET is not set; using the built-in development secret");
    }

    let gateway = ApiGateway::from_config(&config)?;

    tracing::info!(
        "Starting API Gateway on {}:{}",
        config.server.host,
        config.server.port
    );
    let addr = gateway.start().await?;
    tracing::info!(%addr, "API Gateway started successfully");

    signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping API Gateway");

    gateway.stop().await?;
    tracing::info!("API Gateway stopped successfully");

    Ok(())
}
