//! ZenHub API client: the `SnapshotFetcher` the poll cycle reads from.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use boardwatch_common::config::AppConfig;
use boardwatch_common::error::AppError;
use boardwatch_common::types::{BoardSnapshot, Event, Issue, Pipeline};
use boardwatch_engine::fetcher::SnapshotFetcher;

const AUTH_HEADER: &str = "x-authentication-token";

/// Board endpoint response, `GET /p1/repositories/{repo_id}/board`.
#[derive(Debug, Deserialize)]
struct RawBoard {
    #[serde(default)]
    pipelines: Vec<RawPipeline>,
}

#[derive(Debug, Deserialize)]
struct RawPipeline {
    id: String,
    name: String,
    #[serde(default)]
    issues: Vec<RawIssue>,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    issue_number: u64,
    #[serde(default)]
    repo_id: Option<u64>,
}

/// The board this client reads in board mode.
#[derive(Debug, Clone)]
pub struct BoardTarget {
    pub repo_id: u64,
    pub organization: String,
    pub repository: String,
}

pub struct ZenHubClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    board: Option<BoardTarget>,
}

impl ZenHubClient {
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            board: None,
        })
    }

    pub fn with_board(mut self, board: BoardTarget) -> Self {
        self.board = Some(board);
        self
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let client = Self::new(
            config.zenhub_api_url.clone(),
            config.zenhub_access_token.clone(),
            Duration::from_secs(config.http_timeout_secs),
        )?;

        Ok(match config.zenhub_repo_id {
            Some(repo_id) => {
                let (organization, repository) = config.github_owner_and_repo();
                client.with_board(BoardTarget {
                    repo_id,
                    organization,
                    repository,
                })
            }
            None => client,
        })
    }

    /// Fetch one page of the event feed.
    pub async fn try_fetch_events(&self, page: u32) -> Result<Vec<Event>, AppError> {
        let url = format!("{}/v1/events", self.base_url);
        let response = self
            .http
            .get(url)
            .query(&[("page", page)])
            .header(AUTH_HEADER, &self.access_token)
            .send()
            .await?;
        let events = ensure_success(response).await?.json::<Vec<Event>>().await?;

        tracing::debug!(page, events = events.len(), "Fetched ZenHub events");
        Ok(events)
    }

    /// Fetch the configured board.
    pub async fn try_fetch_board(&self) -> Result<BoardSnapshot, AppError> {
        let target = self
            .board
            .as_ref()
            .ok_or_else(|| AppError::Config("no board repository configured".to_string()))?;

        let url = format!("{}/p1/repositories/{}/board", self.base_url, target.repo_id);
        let response = self
            .http
            .get(url)
            .header(AUTH_HEADER, &self.access_token)
            .send()
            .await?;
        let raw = ensure_success(response).await?.json::<RawBoard>().await?;

        Ok(Self::snapshot_from(raw, target))
    }

    fn snapshot_from(raw: RawBoard, target: &BoardTarget) -> BoardSnapshot {
        let pipelines = raw
            .pipelines
            .into_iter()
            .map(|p| Pipeline {
                id: p.id,
                name: p.name,
                issues: p
                    .issues
                    .into_iter()
                    .map(|i| Issue {
                        // Issue numbers are unique within the single repository a board belongs to.
                        id: i.issue_number.to_string(),
                        repo_id: i.repo_id.unwrap_or(target.repo_id),
                        number: i.issue_number,
                    })
                    .collect(),
            })
            .collect();

        BoardSnapshot {
            organization: target.organization.clone(),
            repository: target.repository.clone(),
            pipelines,
        }
    }
}

/// Turn a non-2xx answer into `AppError::Fetch` carrying status and body.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AppError::Fetch(format!("ZenHub responded {}: {}", status, body)))
}

#[async_trait]
impl SnapshotFetcher for ZenHubClient {
    async fn fetch_events(&self, page: u32) -> Vec<Event> {
        match self.try_fetch_events(page).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(page, error = %e, "Failed to fetch ZenHub events, treating as empty");
                Vec::new()
            }
        }
    }

    async fn fetch_board(&self) -> BoardSnapshot {
        match self.try_fetch_board().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to fetch ZenHub board, treating as empty");
                BoardSnapshot::default()
            }
        }
    }
}
