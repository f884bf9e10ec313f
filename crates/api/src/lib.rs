//! HTTP triggers for the poll cycle and for single-message delivery.
//!
//! - `GET /zenhub`: run one poll cycle
//! - `POST /tasks/post_to_hipchat`: deliver one queued payload (`message` form field)
//! - `GET /health`: liveness

pub mod routes;
pub mod state;
