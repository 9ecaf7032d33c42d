//! Variant orchestration for the HomeForge render pipeline.
//!
//! Takes a batch of variant requests, stages input images, submits one
//! job per variant, polls all jobs concurrently, and collects artifacts
//! into a per-variant report.

pub mod batch;
pub mod orchestrator;
pub mod report;
pub mod staging;
