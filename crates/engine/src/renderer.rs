//! Message renderer: one HTML template per change kind.

use html_escape::{encode_single_quoted_attribute, encode_text};

use boardwatch_common::types::{Event, EventKind};

use crate::detector::{ChangeRecord, IssueMove};

const GITHUB_URL: &str = "https://github.com";

pub struct MessageRenderer;

impl MessageRenderer {
    /// Render a change into the HTML body of a chat message.
    ///
    /// Every record yields exactly one message. Kinds without a template get
    /// the `[Unknown]` fallback so they still reach a human.
    pub fn render(record: &ChangeRecord) -> String {
        match record {
            ChangeRecord::NewEvent(event) => Self::render_event(event),
            ChangeRecord::IssueMoved(moved) => Self::render_move(moved),
        }
    }

    pub fn render_event(event: &Event) -> String {
        let actor = actor_link(&event.actor.github.username);
        let issue = issue_link(&event.organization, &event.repository, event.issue);

        match &event.kind {
            EventKind::CreatePlus => format!("{} gave <b>+1</b> to {}.\n", actor, issue),
            EventKind::TransferIssue => {
                let src = event.src_pipeline_name.as_deref().unwrap_or_default();
                let dest = event.dest_pipeline_name.as_deref().unwrap_or_default();
                if src == dest {
                    format!(
                        "{} <b>changed the priority</b> of {} within {}.\n",
                        actor,
                        issue,
                        encode_text(src)
                    )
                } else {
                    format!(
                        "{} moved {} from <b>{}</b> to <b>{}</b>.\n",
                        actor,
                        issue,
                        encode_text(src),
                        encode_text(dest)
                    )
                }
            }
            EventKind::CreateBoard => {
                format!("{} <b>created a board</b> for {}.\n", actor, issue)
            }
            EventKind::Unknown(kind) => format!("[Unknown] type = {}\n", encode_text(kind)),
        }
    }

    pub fn render_move(moved: &IssueMove) -> String {
        format!(
            "{} moved from <b>{}</b> to <b>{}</b>.\n",
            issue_link(&moved.organization, &moved.repository, moved.issue.number),
            encode_text(&moved.from.name),
            encode_text(&moved.to.name)
        )
    }
}

fn actor_link(username: &str) -> String {
    format!(
        "<a href='{}/{}'>{}</a>",
        GITHUB_URL,
        encode_single_quoted_attribute(username),
        encode_text(username)
    )
}

fn issue_link(organization: &str, repository: &str, number: u64) -> String {
    format!(
        "<a href='{}/{}/{}/issues/{}'>{}/{}</a>",
        GITHUB_URL,
        encode_single_quoted_attribute(organization),
        encode_single_quoted_attribute(repository),
        number,
        encode_text(repository),
        number
    )
}
