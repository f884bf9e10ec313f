//! Delivery of one queued message to the chat room.

use std::sync::Arc;

use async_trait::async_trait;

use boardwatch_common::error::AppError;
use boardwatch_common::types::{DeliveryTask, MessageColor};

/// Outbound chat capability.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str, color: MessageColor) -> Result<(), AppError>;
}

/// Delivers a task body with a fixed color.
#[derive(Clone)]
pub struct Delivery {
    notifier: Arc<dyn Notifier>,
    color: MessageColor,
}

impl Delivery {
    pub fn new(notifier: Arc<dyn Notifier>, color: MessageColor) -> Self {
        Self { notifier, color }
    }

    pub async fn deliver(&self, task: &DeliveryTask) -> Result<(), AppError> {
        if task.message.trim().is_empty() {
            return Err(AppError::Validation("message must not be empty".to_string()));
        }
        self.notifier.notify(&task.message, self.color).await
    }
}
