//! Health and monitoring adapter.
//!
//! Exposes liveness/readiness/stats over HTTP via axum. Optional —
//! controlled by `web_enabled` in configuration.

pub mod health;

pub use health::{HealthServer, HealthState};
