//! ZenHub client tests against a local mock server.

use std::time::Duration;

use mockito::{Matcher, Server};

use boardwatch_common::error::AppError;
use boardwatch_common::types::EventKind;
use boardwatch_engine::fetcher::SnapshotFetcher;
use boardwatch_poller::zenhub::{BoardTarget, ZenHubClient};

const TOKEN: &str = "zh-test-token";

fn client(server: &Server) -> ZenHubClient {
    ZenHubClient::new(server.url(), TOKEN, Duration::from_secs(2)).unwrap()
}

fn widgets_board() -> BoardTarget {
    BoardTarget {
        repo_id: 1234,
        organization: "acme".to_string(),
        repository: "widgets".to_string(),
    }
}

#[tokio::test]
async fn test_fetch_events_sends_token_and_page() {
    let mut server = Server::new_async().await;
    let body = serde_json::json!([
        {
            "id": "e1",
            "actor": { "id": "a1", "github": { "username": "alice" } },
            "organization": "acme",
            "repository": "widgets",
            "type": "createBoard",
            "issue": 7,
            "createdAt": "2024-01-01T00:00:00.000Z"
        },
        {
            "id": "e2",
            "actor": { "id": "a2", "github": { "username": "bob" } },
            "organization": "acme",
            "repository": "widgets",
            "type": "somethingNew",
            "issue": 8,
            "createdAt": "2024-01-01T00:00:01.000Z"
        }
    ]);
    let mock = server
        .mock("GET", "/v1/events")
        .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
        .match_header("x-authentication-token", TOKEN)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await;

    let events = client(&server).fetch_events(2).await;

    mock.assert_async().await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, EventKind::CreateBoard);
    assert_eq!(events[0].actor.github.username, "alice");
    assert_eq!(events[1].kind, EventKind::Unknown("somethingNew".to_string()));
}

#[tokio::test]
async fn test_fetch_events_server_error_is_empty() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/v1/events")
        .match_query(Matcher::Any)
        .with_status(503)
        .create_async()
        .await;

    let zenhub = client(&server);
    assert!(zenhub.fetch_events(1).await.is_empty());
    match zenhub.try_fetch_events(1).await {
        Err(AppError::Fetch(msg)) => assert!(msg.contains("503")),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_fetch_events_bad_json_is_empty() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/v1/events")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("{not json")
        .create_async()
        .await;

    assert!(client(&server).fetch_events(1).await.is_empty());
}

#[tokio::test]
async fn test_fetch_board_maps_pipelines_and_issues() {
    let mut server = Server::new_async().await;
    let body = serde_json::json!({
        "pipelines": [
            {
                "id": "p-todo",
                "name": "To Do",
                "issues": [
                    { "issue_number": 42, "estimate": { "value": 3 }, "position": 0 },
                    { "issue_number": 43, "repo_id": 999 }
                ]
            },
            { "id": "p-review", "name": "In Review", "issues": [] }
        ]
    });
    let mock = server
        .mock("GET", "/p1/repositories/1234/board")
        .match_header("x-authentication-token", TOKEN)
        .with_status(200)
        .with_body(body.to_string())
        .create_async()
        .await;

    let snapshot = client(&server)
        .with_board(widgets_board())
        .fetch_board()
        .await;

    mock.assert_async().await;
    assert_eq!(snapshot.organization, "acme");
    assert_eq!(snapshot.repository, "widgets");
    assert_eq!(snapshot.pipelines.len(), 2);
    let todo = &snapshot.pipelines[0];
    assert_eq!(todo.name, "To Do");
    assert_eq!(todo.issues[0].id, "42");
    assert_eq!(todo.issues[0].repo_id, 1234);
    assert_eq!(todo.issues[1].repo_id, 999);
    assert!(snapshot.pipeline("p-review").unwrap().issues.is_empty());
}

#[tokio::test]
async fn test_fetch_board_without_target_is_empty() {
    let server = Server::new_async().await;
    let zenhub = client(&server);
    assert!(zenhub.fetch_board().await.is_empty());
}

#[tokio::test]
async fn test_fetch_board_unauthorized_is_empty() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/p1/repositories/1234/board")
        .with_status(401)
        .create_async()
        .await;

    let zenhub = client(&server).with_board(widgets_board());
    assert!(zenhub.fetch_board().await.is_empty());
    match zenhub.try_fetch_board().await {
        Err(AppError::Fetch(msg)) => assert!(msg.contains("401")),
        other => panic!("unexpected result: {:?}", other),
    }
}
