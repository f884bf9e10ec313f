//! Delivery worker: drains due tasks and retries failures with backoff.
//!
//! Tasks are claimed one at a time, so at most one is in flight while the
//! worker paces its sends. A task whose reschedule or dead-letter write fails
//! is held in memory and written again on the next drain; it also stays in
//! the queue's in-flight set until then.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use boardwatch_common::config::AppConfig;
use boardwatch_common::error::AppError;

use crate::delivery::Delivery;
use crate::queue::{QueuedTask, TaskSource};

/// Longest wait between two attempts of one task.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Most tasks handled by one drain pass.
const DRAIN_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Wait before the next attempt, after `attempts` failures.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        self.base
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_secs(2),
            max_backoff: MAX_BACKOFF,
        }
    }
}

/// What one drain pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    /// Outcomes that could not be written back and wait for the next drain.
    pub held: usize,
}

/// Where a failed task goes next.
#[derive(Debug, Clone)]
enum Settlement {
    Retry { task: QueuedTask, due: DateTime<Utc> },
    DeadLetter(QueuedTask),
}

impl Settlement {
    fn task(&self) -> &QueuedTask {
        match self {
            Settlement::Retry { task, .. } => task,
            Settlement::DeadLetter(task) => task,
        }
    }
}

pub struct DeliveryWorker {
    source: Arc<dyn TaskSource>,
    delivery: Delivery,
    policy: RetryPolicy,
    poll_interval: Duration,
    /// Minimum spacing between two sends when a backlog is drained.
    pace: Duration,
    held: Mutex<Vec<Settlement>>,
}

impl DeliveryWorker {
    pub fn new(source: Arc<dyn TaskSource>, delivery: Delivery, policy: RetryPolicy) -> Self {
        Self {
            source,
            delivery,
            policy,
            poll_interval: Duration::from_millis(500),
            pace: Duration::ZERO,
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(source: Arc<dyn TaskSource>, delivery: Delivery, config: &AppConfig) -> Self {
        let policy = RetryPolicy {
            max_attempts: config.delivery_max_attempts.max(1),
            base: Duration::from_secs(config.delivery_backoff_base_secs),
            max_backoff: MAX_BACKOFF,
        };
        Self::new(source, delivery, policy)
            .with_poll_interval(Duration::from_millis(config.delivery_poll_interval_ms))
            .with_pace(Duration::from_secs(config.dispatch_delay_secs))
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    /// Start the worker loop. Runs indefinitely until the task is cancelled.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(
            max_attempts = self.policy.max_attempts,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Delivery worker started"
        );

        match self.source.recover_in_flight(Utc::now()).await {
            Ok(0) => {}
            Ok(recovered) => tracing::warn!(recovered, "Requeued tasks left in flight by a previous run"),
            Err(e) => tracing::error!(error = %e, "Failed to recover in-flight tasks"),
        }

        loop {
            match self.drain_due(Utc::now()).await {
                Ok(report) if report != DrainReport::default() => {
                    tracing::info!(
                        delivered = report.delivered,
                        retried = report.retried,
                        dead_lettered = report.dead_lettered,
                        held = report.held,
                        "Drained delivery queue"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Failed to poll delivery queue"),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Deliver every task due at `now`, rescheduling failures.
    ///
    /// Only a failed claim is returned as an error; by then every task this
    /// pass touched has been settled or held.
    pub async fn drain_due(&self, now: DateTime<Utc>) -> Result<DrainReport, AppError> {
        let mut report = DrainReport::default();

        let held = std::mem::take(&mut *lock(&self.held));
        for settlement in held {
            if !self.settle(settlement).await {
                report.held += 1;
            }
        }

        for index in 0..DRAIN_LIMIT {
            if index > 0 && !self.pace.is_zero() {
                tokio::time::sleep(self.pace).await;
            }

            let Some(queued) = self.source.claim_due(now, 1).await?.into_iter().next() else {
                break;
            };

            match self.delivery.deliver(&queued.task).await {
                Ok(()) => {
                    tracing::debug!(task_id = %queued.id, "Delivered");
                    report.delivered += 1;
                    if let Err(e) = self.source.acknowledge(&queued).await {
                        // Still in flight: recovery may deliver it a second time.
                        tracing::warn!(task_id = %queued.id, error = %e, "Failed to acknowledge delivered task");
                    }
                }
                Err(e) => {
                    let settlement = self.settlement_for(queued, &e, now);
                    match &settlement {
                        Settlement::Retry { .. } => report.retried += 1,
                        Settlement::DeadLetter(_) => report.dead_lettered += 1,
                    }
                    if !self.settle(settlement).await {
                        report.held += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    fn settlement_for(&self, mut queued: QueuedTask, error: &AppError, now: DateTime<Utc>) -> Settlement {
        queued.attempts += 1;
        let retryable = !matches!(error, AppError::Validation(_));

        if !retryable || queued.attempts >= self.policy.max_attempts {
            tracing::error!(
                task_id = %queued.id,
                attempts = queued.attempts,
                error = %error,
                "Delivery failed permanently, dead-lettering"
            );
            return Settlement::DeadLetter(queued);
        }

        let wait = self.policy.backoff(queued.attempts);
        let due = now + chrono::Duration::from_std(wait).unwrap_or_else(|_| chrono::Duration::seconds(300));
        tracing::warn!(
            task_id = %queued.id,
            attempts = queued.attempts,
            retry_in_ms = wait.as_millis() as u64,
            error = %error,
            "Delivery failed, rescheduling"
        );
        Settlement::Retry { task: queued, due }
    }

    /// Write a failed task back to the queue; hold it on failure.
    async fn settle(&self, settlement: Settlement) -> bool {
        let result = match &settlement {
            Settlement::Retry { task, due } => self.source.schedule(task.clone(), *due).await,
            Settlement::DeadLetter(task) => self.source.dead_letter(task.clone()).await,
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    task_id = %settlement.task().id,
                    error = %e,
                    "Failed to write task back to the queue, holding it for the next drain"
                );
                lock(&self.held).push(settlement);
                false
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
