use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use fairway_api::{app, worker, AppState};
use fairway_core::repository::RateLimitStore;
use fairway_core::SystemClock;
use fairway_store::app_config::Config;
use fairway_store::{InMemoryRateLimiter, RedisRateLimiter};
use tokio::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fairway_api=debug,fairway_booking=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Fairway API on port {}", config.server.port);

    let rate_limiter: Arc<dyn RateLimitStore> = match &config.redis {
        Some(redis) => Arc::new(RedisRateLimiter::new(&redis.url).context("Failed to open Redis client")?),
        None => {
            tracing::warn!("No Redis configured; edit rate limits are per process");
            Arc::new(InMemoryRateLimiter::new())
        }
    };

    let state = AppState::in_memory(&config, rate_limiter, Arc::new(SystemClock))
        .context("Invalid default cancellation policies")?;

    tokio::spawn(worker::run_retention_sweeps(
        state.payments.clone(),
        state.audit.clone(),
        Duration::from_secs(config.server.retention_sweep_secs),
    ));
    tokio::spawn(worker::log_audit_alerts(state.audit.subscribe_alerts()));

    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
