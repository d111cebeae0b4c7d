//! Health/monitoring HTTP endpoint — liveness, readiness, and a small
//! stats surface over the running pipeline.
//!
//! Readiness depends on the upstream session being connected; liveness
//! is unconditional once the process is up.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::adapters::upstream::UpstreamSession;
use crate::core::Sequencer;

/// Shared health state polled by the probes.
pub struct HealthState {
    upstream: Arc<UpstreamSession>,
    sequencer: Arc<Sequencer>,
}

impl HealthState {
    pub fn new(upstream: Arc<UpstreamSession>, sequencer: Arc<Sequencer>) -> Self {
        Self { upstream, sequencer }
    }

    fn is_ready(&self) -> bool {
        self.upstream.is_connected()
    }
}

/// Axum-based health check HTTP server, serving `/live`, `/ready`, and
/// `/stats`.
pub struct HealthServer {
    state: Arc<HealthState>,
    host: String,
    port: u16,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, host: impl Into<String>, port: u16) -> Self {
        Self { state, host: host.into(), port }
    }

    #[instrument(skip(self, shutdown_rx), fields(host = %self.host, port = self.port))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let app = Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .route("/stats", get(Self::stats))
            .with_state(Arc::clone(&self.state));

        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(address = %addr, "health server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    async fn readiness(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
        if state.is_ready() {
            (StatusCode::OK, "READY")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }

    async fn stats(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
        Json(json!({
            "upstream_connected": state.upstream.is_connected(),
            "upstream_subscriptions": state.upstream.subscription_count(),
            "sequencer_tracked_tokens": state.sequencer.len(),
        }))
    }
}
