use std::sync::Arc;

use boardwatch_common::config::AppConfig;
use boardwatch_common::redis_pool::create_redis_pool;
use boardwatch_notifier::delivery::Delivery;
use boardwatch_notifier::hipchat::HipChatClient;
use boardwatch_notifier::queue::RedisTaskQueue;
use boardwatch_notifier::worker::DeliveryWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boardwatch_notifier=info".into()),
        )
        .json()
        .init();

    tracing::info!("Boardwatch notifier starting...");

    let config = AppConfig::from_env()?;
    let redis = create_redis_pool(&config.redis_url).await?;

    let hipchat = HipChatClient::from_config(&config)?;
    let delivery = Delivery::new(Arc::new(hipchat), config.hipchat_color);
    let worker = DeliveryWorker::from_config(Arc::new(RedisTaskQueue::new(redis)), delivery, &config);

    tokio::select! {
        result = worker.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Delivery worker exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("Boardwatch notifier stopped.");
    Ok(())
}
