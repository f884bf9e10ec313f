//! Watermark advancer: commits what a cycle actually enqueued.

use chrono::{DateTime, Utc};

use crate::detector::{Delta, WatermarkUpdate};
use crate::watermark::{self, WatermarkStore};

/// What a commit wrote back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// New `last_check_time`, when it moved.
    pub last_check_time: Option<DateTime<Utc>>,
    /// Issue entries written.
    pub issues_written: usize,
}

pub struct WatermarkAdvancer;

impl WatermarkAdvancer {
    /// Commit the watermark implied by the first `enqueued` changes of `delta`.
    ///
    /// Issue entries of first-seen issues carry no notification and are always
    /// written. Store failures are logged by the store helpers.
    pub async fn commit(store: &dyn WatermarkStore, delta: &Delta, enqueued: usize) -> CommitSummary {
        let enqueued = enqueued.min(delta.changes.len());
        let (done, pending) = delta.changes.split_at(enqueued);
        let mut summary = CommitSummary::default();

        let done_times: Vec<_> = done.iter().filter_map(|c| last_check_time(&c.watermark)).collect();
        let pending_times: Vec<_> = pending
            .iter()
            .filter_map(|c| last_check_time(&c.watermark))
            .collect();

        if let Some(candidate) = safe_last_check_time(&done_times, &pending_times)
            && delta.since.is_none_or(|since| candidate > since)
            && watermark::store_last_check_time(store, candidate).await
        {
            tracing::info!(last_check_time = %candidate, "Advanced last_check_time");
            summary.last_check_time = Some(candidate);
        }

        let issue_updates = delta
            .recorded
            .iter()
            .chain(done.iter().map(|c| &c.watermark));
        for update in issue_updates {
            if let WatermarkUpdate::IssuePipeline {
                issue_id,
                pipeline_id,
            } = update
                && watermark::store_issue_pipeline(store, issue_id, pipeline_id).await
            {
                summary.issues_written += 1;
            }
        }

        if !pending.is_empty() {
            tracing::warn!(
                enqueued,
                not_enqueued = pending.len(),
                "Watermark held back for changes that were not enqueued"
            );
        }

        summary
    }
}

fn last_check_time(update: &WatermarkUpdate) -> Option<DateTime<Utc>> {
    match update {
        WatermarkUpdate::LastCheckTime(at) => Some(*at),
        WatermarkUpdate::IssuePipeline { .. } => None,
    }
}

/// Highest timestamp that can be committed without hiding a pending event.
///
/// With everything enqueued this is the newest enqueued timestamp. Otherwise
/// it is capped just below the oldest pending one, since the feed is not
/// sorted and a pending event can be older than an enqueued one.
pub fn safe_last_check_time(
    done: &[DateTime<Utc>],
    pending: &[DateTime<Utc>],
) -> Option<DateTime<Utc>> {
    let newest_done = done.iter().max().copied()?;
    match pending.iter().min() {
        Some(&oldest_pending) if oldest_pending <= newest_done => {
            Some(oldest_pending - chrono::Duration::milliseconds(1))
        }
        _ => Some(newest_done),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boardwatch_common::types::parse_timestamp;

    fn at(raw: &str) -> DateTime<Utc> {
        parse_timestamp(raw).unwrap()
    }

    #[test]
    fn test_nothing_done_commits_nothing() {
        assert_eq!(safe_last_check_time(&[], &[at("2024-01-01T00:00:00.000Z")]), None);
    }

    #[test]
    fn test_all_done_commits_newest() {
        let done = [
            at("2024-01-01T00:00:03.000Z"),
            at("2024-01-01T00:00:05.000Z"),
            at("2024-01-01T00:00:04.000Z"),
        ];
        assert_eq!(
            safe_last_check_time(&done, &[]),
            Some(at("2024-01-01T00:00:05.000Z"))
        );
    }

    #[test]
    fn test_ascending_prefix_commits_last_done() {
        let done = [at("2024-01-01T00:00:01.000Z"), at("2024-01-01T00:00:02.000Z")];
        let pending = [at("2024-01-01T00:00:03.000Z"), at("2024-01-01T00:00:04.000Z")];
        assert_eq!(
            safe_last_check_time(&done, &pending),
            Some(at("2024-01-01T00:00:02.000Z"))
        );
    }

    #[test]
    fn test_older_pending_caps_the_watermark() {
        let done = [at("2024-01-01T00:00:05.000Z")];
        let pending = [at("2024-01-01T00:00:03.000Z")];
        assert_eq!(
            safe_last_check_time(&done, &pending),
            Some(at("2024-01-01T00:00:02.999Z"))
        );
    }
}
