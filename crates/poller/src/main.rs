use std::sync::Arc;

use boardwatch_common::config::AppConfig;
use boardwatch_common::redis_pool::create_redis_pool;
use boardwatch_poller::build_poll_cycle;
use boardwatch_poller::scheduler::PollScheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boardwatch_poller=info,boardwatch_engine=info".into()),
        )
        .json()
        .init();

    tracing::info!("Boardwatch poller starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to Redis (watermark store and delivery queue)
    let redis = create_redis_pool(&config.redis_url).await?;

    let cycle = Arc::new(build_poll_cycle(&config, redis)?);
    let scheduler = PollScheduler::new(cycle, config.poll_interval_secs);

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        result = scheduler.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Poll scheduler exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("Boardwatch poller stopped.");
    Ok(())
}
