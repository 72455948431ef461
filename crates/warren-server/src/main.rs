//! # Warren Server
//!
//! Host process for the Warren message broker.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! warren
//!
//! # Run with a config file (looked up as ./warren.toml,
//! # /etc/warren/warren.toml, then ~/.config/warren/warren.toml)
//! warren
//!
//! # Run with environment variables
//! WARREN_DATA_DIR=/var/lib/warren WARREN_METRICS_PORT=9100 warren
//! ```

mod bootstrap;
mod config;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warren=info,warren_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!(
        "Starting Warren broker with {:?} storage",
        config.storage.backend
    );

    // Initialize metrics
    metrics::init_metrics();

    bootstrap::run_server(config).await?;

    Ok(())
}
