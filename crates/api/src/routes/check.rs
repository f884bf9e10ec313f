//! "Check now" trigger, typically hit by an external scheduler.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use boardwatch_common::error::AppError;
use boardwatch_engine::cycle::CycleReport;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/zenhub", get(check_now))
}

/// GET /zenhub: Run one poll cycle.
///
/// Answers 500 when enqueueing failed part-way; the watermark then only
/// covers what was enqueued and the next trigger resumes from there.
async fn check_now(State(state): State<AppState>) -> Result<Json<CycleReport>, AppError> {
    let report = state.cycle.run().await?;
    Ok(Json(report))
}
