//! Boardwatch API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use boardwatch_common::config::AppConfig;
use boardwatch_common::redis_pool::create_redis_pool;
use boardwatch_notifier::delivery::Delivery;
use boardwatch_notifier::hipchat::HipChatClient;
use boardwatch_poller::build_poll_cycle;

use boardwatch_api::routes::create_router;
use boardwatch_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("boardwatch_api=debug,boardwatch_engine=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Boardwatch API server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Create Redis connection
    let redis = create_redis_pool(&config.redis_url).await?;
    tracing::info!("Redis connection established");

    // Build application state
    let cycle = Arc::new(build_poll_cycle(&config, redis)?);
    let hipchat = HipChatClient::from_config(&config)?;
    let state = AppState::new(cycle, Delivery::new(Arc::new(hipchat), config.hipchat_color));

    // Build router
    let app = create_router(state).layer(TraceLayer::new_for_http());

    // Start server
    let addr: SocketAddr = config
        .api_bind_addr
        .parse()
        .map_err(|_| anyhow::anyhow!("API_BIND_ADDR must be a socket address"))?;
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
