//! Delta detector: turns a fresh snapshot plus the stored watermark into the
//! ordered list of changes that need a notification.
//!
//! Two algorithms share one entry point, selected by `POLL_MODE`:
//! - event feed: keep events strictly newer than `last_check_time`
//! - board: diff each issue's pipeline against its last-known pipeline
//!
//! Detection never writes the watermark. Every change carries the update it
//! implies and `WatermarkAdvancer` commits those once enqueueing is done.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use boardwatch_common::config::AppConfig;
use boardwatch_common::types::{BoardSnapshot, Event, Issue, PollMode};

use crate::fetcher::SnapshotFetcher;
use crate::watermark::{self, WatermarkStore};

/// A board column, by id and display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRef {
    pub id: String,
    pub name: String,
}

/// An issue observed in a different pipeline than last time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueMove {
    pub issue: Issue,
    pub organization: String,
    pub repository: String,
    pub from: PipelineRef,
    pub to: PipelineRef,
}

/// A change that needs exactly one notification.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeRecord {
    NewEvent(Event),
    IssueMoved(IssueMove),
}

/// The watermark value implied by handling one change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatermarkUpdate {
    LastCheckTime(DateTime<Utc>),
    IssuePipeline {
        issue_id: String,
        pipeline_id: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedChange {
    /// Zero-based position in detection order.
    pub sequence: usize,
    pub record: ChangeRecord,
    pub watermark: WatermarkUpdate,
}

/// Result of one detection pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    /// Changes to notify, in detection order.
    pub changes: Vec<DetectedChange>,
    /// Watermark the feed was compared against (event feed only).
    pub since: Option<DateTime<Utc>>,
    /// Updates that carry no notification (first-seen issues).
    pub recorded: Vec<WatermarkUpdate>,
    /// Records dropped because their timestamp did not parse.
    pub skipped_malformed: usize,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.recorded.is_empty()
    }
}

/// How one board issue relates to its stored pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueObservation {
    FirstSeen,
    Unchanged,
    Moved,
}

pub fn classify(last_known: Option<&str>, current: &str) -> IssueObservation {
    match last_known {
        None => IssueObservation::FirstSeen,
        Some(previous) if previous == current => IssueObservation::Unchanged,
        Some(_) => IssueObservation::Moved,
    }
}

/// Change detector, one variant per polling strategy.
#[derive(Debug, Clone)]
pub enum DeltaDetector {
    EventFeed(EventFeedDetector),
    Board(BoardDetector),
}

impl DeltaDetector {
    pub fn from_config(config: &AppConfig) -> Self {
        match config.poll_mode {
            PollMode::Events => DeltaDetector::EventFeed(EventFeedDetector {
                max_pages: config.zenhub_events_max_pages,
                default_lookback: chrono::Duration::minutes(config.default_lookback_minutes),
            }),
            PollMode::Board => DeltaDetector::Board(BoardDetector {
                tracked_pipelines: config.tracked_pipelines.clone(),
            }),
        }
    }

    pub fn mode(&self) -> PollMode {
        match self {
            DeltaDetector::EventFeed(_) => PollMode::Events,
            DeltaDetector::Board(_) => PollMode::Board,
        }
    }

    pub async fn detect(
        &self,
        fetcher: &dyn SnapshotFetcher,
        store: &dyn WatermarkStore,
        now: DateTime<Utc>,
    ) -> Delta {
        match self {
            DeltaDetector::EventFeed(detector) => detector.detect(fetcher, store, now).await,
            DeltaDetector::Board(detector) => detector.detect(fetcher, store).await,
        }
    }
}

/// Event-feed variant.
#[derive(Debug, Clone)]
pub struct EventFeedDetector {
    /// Feed pages read per cycle.
    pub max_pages: u32,
    /// Window used when no watermark is stored.
    pub default_lookback: chrono::Duration,
}

impl Default for EventFeedDetector {
    fn default() -> Self {
        Self {
            max_pages: 1,
            default_lookback: chrono::Duration::minutes(60),
        }
    }
}

impl EventFeedDetector {
    pub async fn detect(
        &self,
        fetcher: &dyn SnapshotFetcher,
        store: &dyn WatermarkStore,
        now: DateTime<Utc>,
    ) -> Delta {
        let since = match watermark::load_last_check_time(store).await {
            Some(at) => at,
            None => {
                let fallback = now - self.default_lookback;
                tracing::info!(
                    since = %fallback,
                    "No last_check_time stored, falling back to default lookback"
                );
                fallback
            }
        };

        let events = self.fetch_until(fetcher, since).await;
        let (changes, skipped_malformed) = detect_new_events(events, since);

        Delta {
            changes,
            since: Some(since),
            recorded: Vec::new(),
            skipped_malformed,
        }
    }

    /// Read feed pages until one is empty, one reaches back to `since`, or
    /// the page budget runs out.
    async fn fetch_until(&self, fetcher: &dyn SnapshotFetcher, since: DateTime<Utc>) -> Vec<Event> {
        let mut events: Vec<Event> = Vec::new();
        let mut seen_ids = HashSet::new();

        for page in 1..=self.max_pages.max(1) {
            let batch = fetcher.fetch_events(page).await;
            if batch.is_empty() {
                break;
            }

            let reached_watermark = batch
                .iter()
                .any(|e| e.created_at_time().is_ok_and(|at| at <= since));

            // Pages shift while new events arrive; the same event can show up twice.
            for event in batch {
                if event.id.is_empty() || seen_ids.insert(event.id.clone()) {
                    events.push(event);
                }
            }

            if reached_watermark {
                break;
            }
        }

        events
    }
}

/// Keep events strictly newer than `since`, in feed order.
///
/// Returns the surviving changes and the number of records whose timestamp
/// failed to parse. An event stamped exactly `since` is already processed.
pub fn detect_new_events(events: Vec<Event>, since: DateTime<Utc>) -> (Vec<DetectedChange>, usize) {
    let mut changes = Vec::new();
    let mut skipped_malformed = 0usize;

    for event in events {
        let created_at = match event.created_at_time() {
            Ok(at) => at,
            Err(e) => {
                tracing::warn!(
                    event_id = %event.id,
                    created_at = %event.created_at,
                    error = %e,
                    "Skipping event with unparseable timestamp"
                );
                skipped_malformed += 1;
                continue;
            }
        };

        if created_at <= since {
            continue;
        }

        changes.push(DetectedChange {
            sequence: changes.len(),
            watermark: WatermarkUpdate::LastCheckTime(created_at),
            record: ChangeRecord::NewEvent(event),
        });
    }

    (changes, skipped_malformed)
}

/// Board-snapshot variant.
#[derive(Debug, Clone, Default)]
pub struct BoardDetector {
    /// Pipeline names to watch; empty watches every pipeline.
    pub tracked_pipelines: Vec<String>,
}

impl BoardDetector {
    pub fn is_tracked(&self, pipeline_name: &str) -> bool {
        self.tracked_pipelines.is_empty() || self.tracked_pipelines.iter().any(|p| p == pipeline_name)
    }

    pub async fn detect(&self, fetcher: &dyn SnapshotFetcher, store: &dyn WatermarkStore) -> Delta {
        let snapshot = fetcher.fetch_board().await;
        if snapshot.is_empty() {
            tracing::info!("Board snapshot is empty, nothing to compare");
            return Delta::default();
        }

        let mut last_known = HashMap::new();
        for issue in snapshot.pipelines.iter().flat_map(|p| &p.issues) {
            if let Some(pipeline_id) = watermark::load_issue_pipeline(store, &issue.id).await {
                last_known.insert(issue.id.clone(), pipeline_id);
            }
        }

        self.diff(&snapshot, &last_known)
    }

    /// Compare a snapshot with the last-known pipeline of each issue.
    ///
    /// Every issue on the board is tracked for its position. Only moves into
    /// a tracked pipeline are notified; all other moves are recorded.
    pub fn diff(&self, snapshot: &BoardSnapshot, last_known: &HashMap<String, String>) -> Delta {
        let mut delta = Delta::default();

        for pipeline in &snapshot.pipelines {
            for issue in &pipeline.issues {
                let previous = last_known.get(&issue.id).map(String::as_str);
                let update = WatermarkUpdate::IssuePipeline {
                    issue_id: issue.id.clone(),
                    pipeline_id: pipeline.id.clone(),
                };

                match classify(previous, &pipeline.id) {
                    IssueObservation::Unchanged => {}
                    IssueObservation::FirstSeen => {
                        tracing::debug!(
                            issue_id = %issue.id,
                            pipeline = %pipeline.name,
                            "First observation of issue, recording without notifying"
                        );
                        delta.recorded.push(update);
                    }
                    IssueObservation::Moved if !self.is_tracked(&pipeline.name) => {
                        tracing::debug!(
                            issue_id = %issue.id,
                            pipeline = %pipeline.name,
                            "Issue moved into untracked pipeline, recording without notifying"
                        );
                        delta.recorded.push(update);
                    }
                    IssueObservation::Moved => {
                        let from_id = previous.unwrap_or_default().to_string();
                        // The old pipeline may have been renamed or deleted since.
                        let from_name = snapshot
                            .pipeline(&from_id)
                            .map(|p| p.name.clone())
                            .unwrap_or_else(|| from_id.clone());

                        delta.changes.push(DetectedChange {
                            sequence: delta.changes.len(),
                            record: ChangeRecord::IssueMoved(IssueMove {
                                issue: issue.clone(),
                                organization: snapshot.organization.clone(),
                                repository: snapshot.repository.clone(),
                                from: PipelineRef {
                                    id: from_id,
                                    name: from_name,
                                },
                                to: PipelineRef {
                                    id: pipeline.id.clone(),
                                    name: pipeline.name.clone(),
                                },
                            }),
                            watermark: update,
                        });
                    }
                }
            }
        }

        delta
    }
}
