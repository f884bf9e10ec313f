//! Change detection and notification dispatch.

pub mod advancer;
pub mod cycle;
pub mod detector;
pub mod dispatcher;
pub mod fetcher;
pub mod renderer;
pub mod watermark;
