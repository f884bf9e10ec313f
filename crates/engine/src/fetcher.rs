//! Capability boundary to the external board API.

use async_trait::async_trait;

use boardwatch_common::types::{BoardSnapshot, Event};

/// Retrieves the current external state.
///
/// Implementations never fail: transport or decode problems are logged and
/// reported as an empty result, which the detector reads as "no changes".
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    /// One page of the event feed, 1-based.
    async fn fetch_events(&self, page: u32) -> Vec<Event>;

    /// The full board tree.
    async fn fetch_board(&self) -> BoardSnapshot;
}
