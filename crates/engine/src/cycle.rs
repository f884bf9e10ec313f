//! Poll cycle: fetch, detect, render, enqueue, then advance the watermark.
//!
//! A cycle always runs to completion in that order. The watermark is only
//! committed after dispatch returns, and only for the enqueued prefix, so a
//! failure part-way through causes at most duplicates on the next cycle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::advancer::WatermarkAdvancer;
use crate::detector::DeltaDetector;
use crate::dispatcher::{DispatchError, Dispatcher};
use crate::fetcher::SnapshotFetcher;
use crate::renderer::MessageRenderer;
use crate::watermark::WatermarkStore;

/// Outcome of a successful cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub detected: usize,
    pub enqueued: usize,
    pub skipped_malformed: usize,
    pub last_check_time: Option<DateTime<Utc>>,
}

/// Everything one poll cycle needs, wired once at startup.
pub struct PollCycle {
    fetcher: Arc<dyn SnapshotFetcher>,
    store: Arc<dyn WatermarkStore>,
    detector: DeltaDetector,
    dispatcher: Dispatcher,
}

impl PollCycle {
    pub fn new(
        fetcher: Arc<dyn SnapshotFetcher>,
        store: Arc<dyn WatermarkStore>,
        detector: DeltaDetector,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            fetcher,
            store,
            detector,
            dispatcher,
        }
    }

    pub async fn run(&self) -> Result<CycleReport, DispatchError> {
        self.run_at(Utc::now()).await
    }

    /// Run one cycle with an explicit notion of "now".
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<CycleReport, DispatchError> {
        let delta = self
            .detector
            .detect(self.fetcher.as_ref(), self.store.as_ref(), now)
            .await;

        let messages: Vec<String> = delta
            .changes
            .iter()
            .map(|change| MessageRenderer::render(&change.record))
            .collect();

        let dispatched = self.dispatcher.dispatch(messages).await;
        let enqueued = match &dispatched {
            Ok(n) => *n,
            Err(e) => e.enqueued,
        };

        let committed = WatermarkAdvancer::commit(self.store.as_ref(), &delta, enqueued).await;
        dispatched?;

        tracing::info!(
            mode = %self.detector.mode(),
            detected = delta.changes.len(),
            enqueued,
            skipped_malformed = delta.skipped_malformed,
            issues_written = committed.issues_written,
            "Poll cycle completed"
        );

        Ok(CycleReport {
            detected: delta.changes.len(),
            enqueued,
            skipped_malformed: delta.skipped_malformed,
            last_check_time: committed.last_check_time,
        })
    }
}
