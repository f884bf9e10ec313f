use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use boardwatch_engine::cycle::PollCycle;

/// Scheduled trigger that runs one poll cycle per interval.
pub struct PollScheduler {
    cycle: Arc<PollCycle>,
    interval: Duration,
}

impl PollScheduler {
    pub fn new(cycle: Arc<PollCycle>, interval_secs: u64) -> Self {
        Self {
            cycle,
            interval: Duration::from_secs(interval_secs.max(1)),
        }
    }

    /// Start the polling loop. Runs indefinitely until the task is cancelled.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Poll scheduler started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        // A slow cycle must not cause a burst of catch-up cycles.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match self.cycle.run().await {
                Ok(report) if report.enqueued > 0 => {
                    tracing::info!(
                        detected = report.detected,
                        enqueued = report.enqueued,
                        "Notifications enqueued"
                    );
                }
                Ok(_) => tracing::debug!("No changes this cycle"),
                Err(e) => {
                    // The watermark was held back; the next tick retries.
                    tracing::error!(error = %e, "Poll cycle failed");
                }
            }
        }
    }
}
