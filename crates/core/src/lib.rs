//! Shared types for the HomeForge render pipeline: run configuration,
//! variant-request definitions, and the core error type.

pub mod config;
pub mod error;
pub mod variant;
