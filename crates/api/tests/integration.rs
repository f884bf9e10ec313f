//! Integration tests for API routes.
//!
//! Uses `tower::ServiceExt` to test Axum routes without a real HTTP server.
//! Collaborators are in-memory, so no Redis or network is needed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use boardwatch_common::error::AppError;
use boardwatch_common::types::{
    Actor, BoardSnapshot, DeliveryTask, Event, EventKind, GithubUser, MessageColor,
    format_timestamp,
};
use boardwatch_engine::cycle::PollCycle;
use boardwatch_engine::detector::{DeltaDetector, EventFeedDetector};
use boardwatch_engine::dispatcher::{Dispatcher, TaskQueue};
use boardwatch_engine::fetcher::SnapshotFetcher;
use boardwatch_engine::watermark::InMemoryWatermarkStore;
use boardwatch_notifier::delivery::{Delivery, Notifier};
use boardwatch_notifier::queue::InMemoryTaskQueue;

use boardwatch_api::routes::create_router;
use boardwatch_api::state::AppState;

// ============================================================
// Helpers
// ============================================================

struct StaticFetcher {
    events: Vec<Event>,
}

#[async_trait]
impl SnapshotFetcher for StaticFetcher {
    async fn fetch_events(&self, page: u32) -> Vec<Event> {
        if page == 1 { self.events.clone() } else { Vec::new() }
    }

    async fn fetch_board(&self) -> BoardSnapshot {
        BoardSnapshot::default()
    }
}

struct DownQueue;

#[async_trait]
impl TaskQueue for DownQueue {
    async fn enqueue(&self, _task: DeliveryTask, _delay: Duration) -> Result<(), AppError> {
        Err(AppError::Queue("connection refused".to_string()))
    }
}

#[derive(Default)]
struct RecordingNotifier {
    fail: bool,
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str, _color: MessageColor) -> Result<(), AppError> {
        if self.fail {
            return Err(AppError::Delivery("HipChat responded 500".to_string()));
        }
        self.sent.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

fn recent_event(id: &str, issue: u64) -> Event {
    let created_at = chrono::Utc::now() - chrono::Duration::minutes(1);
    Event {
        id: id.to_string(),
        actor: Actor {
            id: "actor-1".to_string(),
            github: GithubUser {
                username: "alice".to_string(),
                avatar_url: None,
            },
        },
        organization: "acme".to_string(),
        repository: "widgets".to_string(),
        kind: EventKind::CreatePlus,
        src_pipeline_name: None,
        dest_pipeline_name: None,
        issue,
        created_at: format_timestamp(created_at),
    }
}

fn build_state(
    events: Vec<Event>,
    queue: Arc<dyn TaskQueue>,
    notifier: Arc<RecordingNotifier>,
) -> AppState {
    let cycle = PollCycle::new(
        Arc::new(StaticFetcher { events }),
        Arc::new(InMemoryWatermarkStore::new()),
        DeltaDetector::EventFeed(EventFeedDetector::default()),
        Dispatcher::new(queue, Duration::from_secs(1)),
    );
    AppState::new(Arc::new(cycle), Delivery::new(notifier, MessageColor::Green))
}

fn post_form(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

// ============================================================
// Health
// ============================================================

#[tokio::test]
async fn test_health_endpoint() {
    let state = build_state(
        Vec::new(),
        Arc::new(InMemoryTaskQueue::new()),
        Arc::new(RecordingNotifier::default()),
    );
    let app = create_router(state);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "boardwatch-api");
}

// ============================================================
// Check trigger
// ============================================================

#[tokio::test]
async fn test_check_enqueues_new_events() {
    let queue = Arc::new(InMemoryTaskQueue::new());
    let state = build_state(
        vec![recent_event("e1", 7), recent_event("e2", 8)],
        queue.clone(),
        Arc::new(RecordingNotifier::default()),
    );
    let app = create_router(state);

    let response = app
        .oneshot(Request::builder().uri("/zenhub").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["detected"], 2);
    assert_eq!(json["enqueued"], 2);
    assert_eq!(json["skipped_malformed"], 0);

    let pending = queue.pending();
    assert_eq!(pending.len(), 2);
    assert!(pending[0].1.task.message.contains("widgets/7"));
    assert!(pending[1].1.task.message.contains("widgets/8"));
}

#[tokio::test]
async fn test_check_twice_is_silent_the_second_time() {
    let queue = Arc::new(InMemoryTaskQueue::new());
    let state = build_state(
        vec![recent_event("e1", 7)],
        queue.clone(),
        Arc::new(RecordingNotifier::default()),
    );
    let app = create_router(state);

    for expected in [1, 0] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/zenhub").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["enqueued"], expected);
    }
    assert_eq!(queue.pending().len(), 1);
}

#[tokio::test]
async fn test_check_enqueue_failure_is_server_error() {
    let state = build_state(
        vec![recent_event("e1", 7)],
        Arc::new(DownQueue),
        Arc::new(RecordingNotifier::default()),
    );
    let app = create_router(state);

    let response = app
        .oneshot(Request::builder().uri("/zenhub").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(response).await;
    assert!(json["error"].as_str().unwrap().contains("connection refused"));
}

// ============================================================
// Delivery trigger
// ============================================================

#[tokio::test]
async fn test_post_to_hipchat_delivers_message() {
    let notifier = Arc::new(RecordingNotifier::default());
    let state = build_state(Vec::new(), Arc::new(InMemoryTaskQueue::new()), notifier.clone());
    let app = create_router(state);

    let response = app
        .oneshot(post_form(
            "/tasks/post_to_hipchat",
            "message=%3Cb%3Ehi%3C%2Fb%3E%0A",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["delivered"], true);
    assert_eq!(notifier.sent.lock().unwrap().as_slice(), &["<b>hi</b>\n".to_string()]);
}

#[tokio::test]
async fn test_post_to_hipchat_failure_is_bad_gateway() {
    let notifier = Arc::new(RecordingNotifier {
        fail: true,
        ..Default::default()
    });
    let state = build_state(Vec::new(), Arc::new(InMemoryTaskQueue::new()), notifier);
    let app = create_router(state);

    let response = app
        .oneshot(post_form("/tasks/post_to_hipchat", "message=hello"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_post_to_hipchat_without_message_is_rejected() {
    let notifier = Arc::new(RecordingNotifier::default());
    let state = build_state(Vec::new(), Arc::new(InMemoryTaskQueue::new()), notifier.clone());
    let app = create_router(state);

    let response = app
        .oneshot(post_form("/tasks/post_to_hipchat", ""))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(notifier.sent.lock().unwrap().is_empty());
}
