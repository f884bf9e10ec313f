//! Notification delivery.
//!
//! - `queue`: Redis delay queue fed by the dispatcher
//! - `worker`: drains due tasks, retrying with exponential backoff and
//!   dead-lettering tasks that exhaust their attempts
//! - `hipchat`: the outbound room message call

pub mod delivery;
pub mod hipchat;
pub mod queue;
pub mod worker;
