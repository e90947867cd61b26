//! Solace Gateway - Session-aware chat relay for the Solace companion.
//!
//! This crate provides:
//! - Per-session conversation history with bounded lifetime
//! - Fixed-window rate limiting per client
//! - Retrying chat-completion calls with exponential backoff
//! - The `/api/chat` and `/api/health` endpoints
//!
//! ## Architecture
//!
//! ```text
//! Client → Router (body limit, CORS) → ChatService
//!            validate → rate check → credential check
//!                ↓
//!          SessionStore (per-session lock) → ResilientProvider → completion API
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod chat;
pub mod clock;
pub mod provider;
pub mod rate_limit;
pub mod retry;
pub mod routes;
pub mod session;

pub use chat::{ChatError, ChatReply, ChatRequest, ChatService, ChatSettings};
pub use provider::{
    ApiKeySource, ChatCompletionProvider, EnvApiKeySource, Provider, ResilientProvider,
    StaticApiKeySource, UpstreamError,
};
pub use rate_limit::{RateLimitConfig, RateLimitDecision, RateLimiter};
pub use retry::{retry_with_backoff, retry_with_backoff_when, RetryPolicy};
pub use routes::AppState;
pub use session::{ConversationHistory, ConversationTurn, Role, SessionStore, SessionStoreConfig};

use axum::Router;
use solace_common::config::Config;
use solace_common::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Wire up sessions, rate limiting and the upstream client from configuration.
pub fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let keys: Arc<dyn ApiKeySource> =
        Arc::new(EnvApiKeySource::new(config.upstream.api_key.clone()));

    let completion = ChatCompletionProvider::new(&config.upstream, Arc::clone(&keys))?;
    let provider: Arc<dyn Provider> = Arc::new(ResilientProvider::new(
        Arc::new(completion),
        RetryPolicy::from(&config.retry),
    ));

    let sessions = SessionStore::new(SessionStoreConfig::from(&config.session));
    let limiter = config
        .rate_limit
        .enabled
        .then(|| RateLimiter::new(RateLimitConfig::from(&config.rate_limit)));

    Ok(AppState {
        chat: ChatService::new(
            sessions,
            limiter,
            provider,
            keys,
            ChatSettings::from(&config.session),
        ),
        client_keys: rate_limit::extractor_from_settings(&config.rate_limit),
    })
}

/// Build the relay router from configuration.
pub fn build_router(config: &Config) -> anyhow::Result<Router> {
    let state = build_state(config)?;
    Ok(routes::build_routes(state, &config.server))
}

/// Periodically drop expired sessions and stale rate-limit windows.
pub fn spawn_maintenance(state: AppState, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let sessions = state.chat.sessions().sweep();
            let windows = state.chat.limiter().map_or(0, RateLimiter::sweep);
            if sessions > 0 || windows > 0 {
                tracing::debug!(
                    expired_sessions = sessions,
                    stale_windows = windows,
                    active_sessions = state.chat.sessions().len(),
                    "Maintenance sweep"
                );
            }
        }
    })
}

/// Start the relay and serve until Ctrl-C.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let ip: std::net::IpAddr = config.server.host.parse().map_err(|e| {
        Error::Config(format!("invalid server.host {:?}: {e}", config.server.host))
    })?;
    let addr = SocketAddr::from((ip, config.server.port));

    let state = build_state(config)?;
    let maintenance = spawn_maintenance(state.clone(), config.session.sweep_interval());
    let router = routes::build_routes(state, &config.server);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        environment = %config.server.environment,
        static_dir = ?config.server.static_dir,
        "Solace Gateway listening"
    );

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    maintenance.abort();
    tracing::info!("Solace Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
