//! Solace Gateway - Main entry point.

use anyhow::Result;
use solace_common::config::{Config, API_KEY_ENV};
use solace_common::logging::init_from_config;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is normal outside development
    let dotenv = dotenvy::dotenv();

    let config = Config::load_with_env()?;
    init_from_config(&config.observability);

    if let Ok(path) = &dotenv {
        tracing::debug!(path = %path.display(), "Loaded .env file");
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    tracing::info!("Solace Gateway v{}", env!("CARGO_PKG_VERSION"));

    if config.has_api_key() {
        tracing::info!("Upstream API key configured");
    } else {
        tracing::error!(
            env = API_KEY_ENV,
            "Upstream API key is missing; chat requests will be answered with 503 until it is set"
        );
    }

    solace_gateway::start_server(&config).await
}
