//! ZenHub polling: the API client and the scheduled trigger.

pub mod scheduler;
pub mod zenhub;

use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;

use boardwatch_common::config::AppConfig;
use boardwatch_engine::cycle::PollCycle;
use boardwatch_engine::detector::DeltaDetector;
use boardwatch_engine::dispatcher::Dispatcher;
use boardwatch_engine::watermark::RedisWatermarkStore;
use boardwatch_notifier::queue::RedisTaskQueue;

use crate::zenhub::ZenHubClient;

/// Wire a production poll cycle: ZenHub in, Redis watermark, Redis delay queue out.
pub fn build_poll_cycle(config: &AppConfig, redis: ConnectionManager) -> anyhow::Result<PollCycle> {
    let fetcher = ZenHubClient::from_config(config)?;
    let store = RedisWatermarkStore::new(redis.clone());
    let queue = RedisTaskQueue::new(redis);
    let detector = DeltaDetector::from_config(config);

    tracing::info!(
        mode = %detector.mode(),
        tracked_pipelines = ?config.tracked_pipelines,
        "Poll cycle configured"
    );

    Ok(PollCycle::new(
        Arc::new(fetcher),
        Arc::new(store),
        detector,
        Dispatcher::new(
            Arc::new(queue),
            Duration::from_secs(config.dispatch_delay_secs),
        ),
    ))
}
