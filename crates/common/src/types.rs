use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Wire format of every persisted timestamp: `YYYY-MM-DDTHH:MM:SS.mmmZ`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Format a timestamp the way it is persisted as a watermark.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse an RFC 3339 timestamp, truncated to millisecond precision.
///
/// Truncation keeps comparisons consistent with a persisted watermark, which
/// only ever carries milliseconds.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|at| at.with_timezone(&Utc).trunc_subsecs(3))
}

/// Which change-detection algorithm a poll cycle runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollMode {
    /// Poll the ZenHub event feed against `last_check_time`.
    Events,
    /// Poll a board snapshot against per-issue last-known pipelines.
    Board,
}

impl FromStr for PollMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "events" => Ok(PollMode::Events),
            "board" => Ok(PollMode::Board),
            other => Err(format!("unknown poll mode: {}", other)),
        }
    }
}

impl std::fmt::Display for PollMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollMode::Events => write!(f, "events"),
            PollMode::Board => write!(f, "board"),
        }
    }
}

/// HipChat message background colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageColor {
    Yellow,
    Green,
    Red,
    Purple,
    Gray,
    Random,
}

impl MessageColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageColor::Yellow => "yellow",
            MessageColor::Green => "green",
            MessageColor::Red => "red",
            MessageColor::Purple => "purple",
            MessageColor::Gray => "gray",
            MessageColor::Random => "random",
        }
    }
}

impl FromStr for MessageColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yellow" => Ok(MessageColor::Yellow),
            "green" => Ok(MessageColor::Green),
            "red" => Ok(MessageColor::Red),
            "purple" => Ok(MessageColor::Purple),
            "gray" | "grey" => Ok(MessageColor::Gray),
            "random" => Ok(MessageColor::Random),
            other => Err(format!("unknown message color: {}", other)),
        }
    }
}

impl std::fmt::Display for MessageColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind tag of a ZenHub feed event.
///
/// Kinds this system has no template for are kept verbatim so they can still
/// be shown to a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    CreatePlus,
    TransferIssue,
    CreateBoard,
    Unknown(String),
}

impl From<String> for EventKind {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "createPlus" => EventKind::CreatePlus,
            "transferIssue" => EventKind::TransferIssue,
            "createBoard" => EventKind::CreateBoard,
            _ => EventKind::Unknown(raw),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.to_string()
    }
}

impl Default for EventKind {
    fn default() -> Self {
        EventKind::Unknown(String::new())
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::CreatePlus => write!(f, "createPlus"),
            EventKind::TransferIssue => write!(f, "transferIssue"),
            EventKind::CreateBoard => write!(f, "createBoard"),
            EventKind::Unknown(raw) => f.write_str(raw),
        }
    }
}

/// GitHub identity attached to a ZenHub actor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubUser {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// The user who caused a feed event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub github: GithubUser,
}

/// One record of the ZenHub event feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub actor: Actor,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub repository: String,
    #[serde(rename = "type", default)]
    pub kind: EventKind,
    #[serde(default)]
    pub src_pipeline_name: Option<String>,
    #[serde(default)]
    pub dest_pipeline_name: Option<String>,
    #[serde(default)]
    pub issue: u64,
    /// Creation time as sent by the feed; parsed per record.
    pub created_at: String,
}

impl Event {
    pub fn created_at_time(&self) -> Result<DateTime<Utc>, chrono::ParseError> {
        parse_timestamp(&self.created_at)
    }
}

/// An issue card on a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Stable id, unique across the board.
    pub id: String,
    pub repo_id: u64,
    pub number: u64,
}

/// A named workflow column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    pub issues: Vec<Issue>,
}

/// The full board tree at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    /// GitHub organization the board's repository lives in.
    pub organization: String,
    pub repository: String,
    pub pipelines: Vec<Pipeline>,
}

impl BoardSnapshot {
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn pipeline(&self, id: &str) -> Option<&Pipeline> {
        self.pipelines.iter().find(|p| p.id == id)
    }
}

/// Payload of one queued delivery: the rendered message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryTask {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_decodes_zenhub_payload() {
        let raw = serde_json::json!({
            "id": "5a1",
            "repoId": 123,
            "actor": { "id": "u1", "github": { "id": 9, "username": "alice", "avatarUrl": "x" } },
            "organization": "acme",
            "repository": "widgets",
            "type": "transferIssue",
            "srcPipelineName": "Backlog",
            "destPipelineName": "In Progress",
            "issue": 7,
            "createdAt": "2024-01-01T00:00:00.000Z"
        });
        let event: Event = serde_json::from_value(raw).unwrap();
        assert_eq!(event.kind, EventKind::TransferIssue);
        assert_eq!(event.actor.github.username, "alice");
        assert_eq!(event.src_pipeline_name.as_deref(), Some("Backlog"));
        assert_eq!(event.dest_pipeline_name.as_deref(), Some("In Progress"));
        assert_eq!(event.issue, 7);
    }

    #[test]
    fn test_unknown_kind_is_kept_verbatim() {
        let kind: EventKind = serde_json::from_value(serde_json::json!("closeIssue")).unwrap();
        assert_eq!(kind, EventKind::Unknown("closeIssue".to_string()));
        assert_eq!(kind.to_string(), "closeIssue");
    }

    #[test]
    fn test_timestamp_format_matches_watermark_layout() {
        let at = parse_timestamp("2024-01-01T00:00:00.000Z").unwrap();
        assert_eq!(format_timestamp(at), "2024-01-01T00:00:00.000Z");

        let precise = parse_timestamp("2024-01-01T00:00:00.123456Z").unwrap();
        assert_eq!(format_timestamp(precise), "2024-01-01T00:00:00.123Z");
    }

    #[test]
    fn test_malformed_timestamp_is_an_error() {
        assert!(parse_timestamp("yesterday").is_err());
        assert!(parse_timestamp("").is_err());
    }

    #[test]
    fn test_modes_and_colors_parse() {
        assert_eq!("Board".parse::<PollMode>(), Ok(PollMode::Board));
        assert!("stream".parse::<PollMode>().is_err());
        assert_eq!("grey".parse::<MessageColor>(), Ok(MessageColor::Gray));
        assert_eq!(MessageColor::Green.to_string(), "green");
    }
}
