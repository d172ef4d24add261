//! # Realtime Gateway
//!
//! Entry point of the real-time connection gateway. Initializes:
//! - Tracing/logging subsystem
//! - Configuration loading
//! - Database connection pool and collaborators
//! - Connection hub and HTTP/WebSocket server

use anyhow::Result;
use tracing::info;

use realtime_gateway::config::Settings;
use realtime_gateway::startup::Application;

#[tokio::main]
async fn main() -> Result<()> {
    realtime_gateway::telemetry::init_tracing();

    info!("Starting realtime gateway...");

    let settings = Settings::load()?;
    info!(
        host = %settings.server.host,
        port = %settings.server.port,
        environment = %settings.environment,
        "Configuration loaded"
    );

    let application = Application::build(settings).await?;

    info!("Server ready to accept connections");
    application.run_until_stopped().await?;

    info!("Server stopped");
    Ok(())
}
