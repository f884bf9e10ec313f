//! Delivery trigger for one previously enqueued payload.

use axum::extract::State;
use axum::routing::post;
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::json;

use boardwatch_common::error::AppError;
use boardwatch_common::types::DeliveryTask;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/tasks/post_to_hipchat", post(post_to_hipchat))
}

#[derive(Debug, Deserialize)]
pub struct DeliveryForm {
    #[serde(default)]
    pub message: String,
}

/// POST /tasks/post_to_hipchat: Deliver a `message` form field to the room.
///
/// A failed send answers 502 so the calling task queue retries it.
async fn post_to_hipchat(
    State(state): State<AppState>,
    Form(form): Form<DeliveryForm>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .delivery
        .deliver(&DeliveryTask {
            message: form.message,
        })
        .await?;
    Ok(Json(json!({ "delivered": true })))
}
