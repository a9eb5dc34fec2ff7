//! # Lobby Server
//!
//! Chat presence and room-routing server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with a config file in the working directory (lobby.toml)
//! LOBBY_AUTH__JWT_SECRET=change-me lobby
//!
//! # Run with a specific config file
//! LOBBY_CONFIG=/path/to/lobby.toml lobby
//!
//! # Override individual settings
//! LOBBY_PORT=8080 LOBBY_HOST=0.0.0.0 lobby
//! ```

mod auth;
mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lobby=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Lobby server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
