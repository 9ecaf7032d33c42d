//! ComfyUI REST client library.
//!
//! Provides a typed workflow-graph builder, job submission over the
//! `/prompt` endpoint, history polling with a bounded wait, artifact
//! download via `/view`, and a bounded-retry helper for the fatal-path
//! operations.

pub mod api;
pub mod artifacts;
pub mod graph;
pub mod history;
pub mod poller;
pub mod retry;
