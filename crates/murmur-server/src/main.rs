//! # Murmur
//!
//! Presence-aware realtime relay for one-to-one chat.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! murmur
//!
//! # Run with a specific config file
//! MURMUR_CONFIG=/path/to/murmur.toml murmur
//!
//! # Override individual settings
//! MURMUR_PORT=4000 MURMUR_HOST=0.0.0.0 MURMUR_RELAY__PRESENCE=delta murmur
//! ```

use anyhow::Result;
use murmur_server::{config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!("Starting Murmur relay on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
