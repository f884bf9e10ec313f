use std::str::FromStr;

use serde::Deserialize;

use crate::types::{MessageColor, PollMode};

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// ZenHub API base URL
    pub zenhub_api_url: String,

    /// ZenHub access token, sent as `x-authentication-token`
    pub zenhub_access_token: String,

    /// Which change-detection algorithm a poll cycle runs
    pub poll_mode: PollMode,

    /// Upper bound on event-feed pages read per cycle (default: 1)
    pub zenhub_events_max_pages: u32,

    /// GitHub repository id of the tracked board (board mode only)
    pub zenhub_repo_id: Option<u64>,

    /// `org/repo` of the tracked board, used for issue links
    pub github_repository: String,

    /// Pipelines whose issues are tracked in board mode (empty = all)
    pub tracked_pipelines: Vec<String>,

    /// Lookback window when no watermark is stored (default: 60)
    pub default_lookback_minutes: i64,

    /// Interval between scheduled poll cycles in seconds (default: 60)
    pub poll_interval_secs: u64,

    /// Timeout for outbound HTTP calls in seconds (default: 10)
    pub http_timeout_secs: u64,

    /// Redis connection string
    pub redis_url: String,

    /// HipChat v1 room message endpoint
    pub hipchat_api_url: String,

    /// HipChat room receiving notifications
    pub hipchat_room_id: String,

    /// HipChat API token
    pub hipchat_auth_token: String,

    /// Origin label shown next to each message
    pub hipchat_from: String,

    /// Background color for delivered messages
    pub hipchat_color: MessageColor,

    /// Delay unit between consecutive messages of one cycle (default: 1)
    pub dispatch_delay_secs: u64,

    /// Delivery attempts before a task is dead-lettered (default: 5)
    pub delivery_max_attempts: u32,

    /// Delivery worker queue polling interval in milliseconds (default: 500)
    pub delivery_poll_interval_ms: u64,

    /// Base of the exponential retry backoff in seconds (default: 2)
    pub delivery_backoff_base_secs: u64,

    /// Socket address the API server binds to
    pub api_bind_addr: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let poll_mode: PollMode = env_or("POLL_MODE", PollMode::Events)?;
        let zenhub_repo_id = match std::env::var("ZENHUB_REPO_ID") {
            Ok(raw) => Some(
                raw.parse()
                    .map_err(|_| anyhow::anyhow!("ZENHUB_REPO_ID must be a valid u64"))?,
            ),
            Err(_) => None,
        };
        if poll_mode == PollMode::Board && zenhub_repo_id.is_none() {
            anyhow::bail!("ZENHUB_REPO_ID environment variable is required when POLL_MODE=board");
        }

        Ok(Self {
            zenhub_api_url: std::env::var("ZENHUB_API_URL")
                .unwrap_or_else(|_| "https://api.zenhub.io".to_string()),
            zenhub_access_token: std::env::var("ZENHUB_ACCESS_TOKEN").map_err(|_| {
                anyhow::anyhow!("ZENHUB_ACCESS_TOKEN environment variable is required")
            })?,
            poll_mode,
            zenhub_events_max_pages: env_or("ZENHUB_EVENTS_MAX_PAGES", 1)?,
            zenhub_repo_id,
            github_repository: std::env::var("GITHUB_REPOSITORY").unwrap_or_default(),
            tracked_pipelines: std::env::var("TRACKED_PIPELINES")
                .map(|raw| parse_list(&raw))
                .unwrap_or_default(),
            default_lookback_minutes: env_or("DEFAULT_LOOKBACK_MINUTES", 60)?,
            poll_interval_secs: env_or("POLL_INTERVAL_SECS", 60)?,
            http_timeout_secs: env_or("HTTP_TIMEOUT_SECS", 10)?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            hipchat_api_url: std::env::var("HIPCHAT_API_URL")
                .unwrap_or_else(|_| "https://api.hipchat.com/v1/rooms/message".to_string()),
            hipchat_room_id: std::env::var("HIPCHAT_ROOM_ID")
                .map_err(|_| anyhow::anyhow!("HIPCHAT_ROOM_ID environment variable is required"))?,
            hipchat_auth_token: std::env::var("HIPCHAT_AUTH_TOKEN").map_err(|_| {
                anyhow::anyhow!("HIPCHAT_AUTH_TOKEN environment variable is required")
            })?,
            hipchat_from: std::env::var("HIPCHAT_FROM").unwrap_or_else(|_| "zenhub.io".to_string()),
            hipchat_color: env_or("HIPCHAT_COLOR", MessageColor::Green)?,
            dispatch_delay_secs: env_or("DISPATCH_DELAY_SECS", 1)?,
            delivery_max_attempts: env_or("DELIVERY_MAX_ATTEMPTS", 5)?,
            delivery_poll_interval_ms: env_or("DELIVERY_POLL_INTERVAL_MS", 500)?,
            delivery_backoff_base_secs: env_or("DELIVERY_BACKOFF_BASE_SECS", 2)?,
            api_bind_addr: std::env::var("API_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
        })
    }

    /// Split `GITHUB_REPOSITORY` into `(organization, repository)`.
    pub fn github_owner_and_repo(&self) -> (String, String) {
        match self.github_repository.split_once('/') {
            Some((org, repo)) => (org.to_string(), repo.to_string()),
            None => (String::new(), self.github_repository.clone()),
        }
    }
}

/// Read an optional variable, falling back to `default` when unset.
fn env_or<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_trims_and_drops_empty() {
        assert_eq!(
            parse_list(" In Review, QA ,,Done"),
            vec!["In Review", "QA", "Done"]
        );
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_github_owner_and_repo() {
        let mut config = AppConfig {
            zenhub_api_url: String::new(),
            zenhub_access_token: String::new(),
            poll_mode: PollMode::Board,
            zenhub_events_max_pages: 1,
            zenhub_repo_id: Some(1),
            github_repository: "acme/widgets".to_string(),
            tracked_pipelines: Vec::new(),
            default_lookback_minutes: 60,
            poll_interval_secs: 60,
            http_timeout_secs: 10,
            redis_url: String::new(),
            hipchat_api_url: String::new(),
            hipchat_room_id: String::new(),
            hipchat_auth_token: String::new(),
            hipchat_from: String::new(),
            hipchat_color: MessageColor::Green,
            dispatch_delay_secs: 1,
            delivery_max_attempts: 5,
            delivery_poll_interval_ms: 500,
            delivery_backoff_base_secs: 2,
            api_bind_addr: String::new(),
        };
        assert_eq!(
            config.github_owner_and_repo(),
            ("acme".to_string(), "widgets".to_string())
        );

        config.github_repository = "widgets".to_string();
        assert_eq!(
            config.github_owner_and_repo(),
            (String::new(), "widgets".to_string())
        );
    }
}
