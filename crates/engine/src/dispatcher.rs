//! Dispatcher: hands rendered messages to the delivery queue.
//!
//! Message `i` of a cycle is enqueued with delay `unit * (i + 1)`, so delivery
//! keeps detection order and never exceeds one message per unit interval.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use boardwatch_common::error::AppError;
use boardwatch_common::types::DeliveryTask;

/// Asynchronous task submission with a per-task delay.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: DeliveryTask, delay: Duration) -> Result<(), AppError>;
}

/// The first failed enqueue of a cycle.
#[derive(Debug, Error)]
#[error("enqueue failed after {enqueued} message(s): {source}")]
pub struct DispatchError {
    /// Messages successfully enqueued before the failure.
    pub enqueued: usize,
    #[source]
    pub source: AppError,
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        AppError::Queue(err.to_string())
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    queue: Arc<dyn TaskQueue>,
    delay_unit: Duration,
}

impl Dispatcher {
    pub fn new(queue: Arc<dyn TaskQueue>, delay_unit: Duration) -> Self {
        Self { queue, delay_unit }
    }

    /// Delay assigned to the message at zero-based position `index`.
    pub fn delay_for(&self, index: usize) -> Duration {
        let steps = u32::try_from(index + 1).unwrap_or(u32::MAX);
        self.delay_unit.saturating_mul(steps)
    }

    /// Enqueue messages in order, stopping at the first failure.
    ///
    /// Returns the number of messages enqueued.
    pub async fn dispatch(&self, messages: Vec<String>) -> Result<usize, DispatchError> {
        let total = messages.len();

        for (index, message) in messages.into_iter().enumerate() {
            let delay = self.delay_for(index);
            if let Err(source) = self.queue.enqueue(DeliveryTask { message }, delay).await {
                tracing::error!(
                    index,
                    total,
                    error = %source,
                    "Enqueue failed, aborting the rest of the cycle"
                );
                return Err(DispatchError {
                    enqueued: index,
                    source,
                });
            }
            tracing::debug!(index, delay_ms = delay.as_millis() as u64, "Message enqueued");
        }

        Ok(total)
    }
}
