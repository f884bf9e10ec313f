//! Shared application state for the Axum API server.

use std::sync::Arc;

use boardwatch_engine::cycle::PollCycle;
use boardwatch_notifier::delivery::Delivery;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub cycle: Arc<PollCycle>,
    pub delivery: Delivery,
}

impl AppState {
    pub fn new(cycle: Arc<PollCycle>, delivery: Delivery) -> Self {
        Self { cycle, delivery }
    }
}
