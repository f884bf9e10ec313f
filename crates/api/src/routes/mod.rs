pub mod check;
pub mod health;
pub mod tasks;

use axum::Router;

use crate::state::AppState;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(check::router())
        .merge(tasks::router())
        .with_state(state)
}
