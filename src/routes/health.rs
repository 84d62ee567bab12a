//! Unauthenticated health-check endpoint.

use std::sync::atomic::Ordering;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

/// `GET /api/health`: liveness probe.
///
/// Returns status, uptime, version and a tunnel summary. No authentication
/// required, suitable for load-balancer health checks.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let uptime = state.start_time.elapsed().as_secs();
    let tunnel = state.orchestrator.get_status();

    Json(json!({
        "status": "ok",
        "uptime_secs": uptime,
        "version": env!("CARGO_PKG_VERSION"),
        "serving": state.server_running.load(Ordering::Relaxed),
        "tunnel": {
            "state": tunnel.state,
            "running": tunnel.running,
            "public_url": tunnel.public_url,
        },
    }))
}
