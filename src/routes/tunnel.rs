//! Tunnel control endpoints.
//!
//! | Method | Path                | Body                         |
//! |--------|---------------------|------------------------------|
//! | GET    | `/api/tunnel`       | none                         |
//! | POST   | `/api/tunnel/start` | optional [`StartRequest`]    |
//! | POST   | `/api/tunnel/stop`  | none                         |
//!
//! Every success returns the current [`TunnelStatus`]. Failures return
//! `{"error", "code"}` with a status derived from the error kind.

use std::path::PathBuf;

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tunnel::{OrchestratorError, ProcessError, TunnelConfig, TunnelError, TunnelStatus};
use crate::AppState;

type ApiError = (StatusCode, Json<Value>);

/// Overrides applied on top of the configured default tunnel.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartRequest {
    pub local_port: Option<u16>,
    pub tunnel_name: Option<String>,
    pub auth_token: Option<String>,
    pub binary_path: Option<PathBuf>,
    pub subdomain: Option<String>,
    pub host: Option<String>,
}

impl StartRequest {
    fn merge_into(self, mut config: TunnelConfig) -> TunnelConfig {
        if let Some(port) = self.local_port {
            config.local_port = port;
        }
        if self.tunnel_name.is_some() {
            config.tunnel_name = self.tunnel_name;
        }
        if self.auth_token.is_some() {
            config.auth_token = self.auth_token;
        }
        if self.binary_path.is_some() {
            config.binary_path = self.binary_path;
        }
        if self.subdomain.is_some() {
            config.subdomain = self.subdomain;
        }
        if self.host.is_some() {
            config.host = self.host;
        }
        config
    }
}

/// `GET /api/tunnel`: current status snapshot.
pub async fn status(State(state): State<AppState>) -> Json<TunnelStatus> {
    Json(state.orchestrator.get_status())
}

/// `POST /api/tunnel/start`: start the primary tunnel and wait for its URL.
///
/// An empty body starts the configured default.
pub async fn start(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<TunnelStatus>, ApiError> {
    let config = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        let request: StartRequest = serde_json::from_slice(&body).map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": format!("Invalid request body: {e}"),
                    "code": "INVALID_REQUEST",
                })),
            )
        })?;
        Some(request.merge_into(state.orchestrator.options().default_config.clone()))
    };

    state
        .orchestrator
        .start_tunnel(config)
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

/// `POST /api/tunnel/stop`: stop the primary tunnel. Always succeeds.
pub async fn stop(State(state): State<AppState>) -> Json<TunnelStatus> {
    Json(state.orchestrator.stop_tunnel().await)
}

fn error_response(err: &TunnelError) -> ApiError {
    let status = match err {
        TunnelError::Orchestrator(OrchestratorError::ServerNotRunning) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        TunnelError::Orchestrator(
            OrchestratorError::AlreadyRunning | OrchestratorError::Cancelled,
        ) => StatusCode::CONFLICT,
        TunnelError::Process(ProcessError::InvalidConfig(_)) => StatusCode::BAD_REQUEST,
        TunnelError::Process(ProcessError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    (
        status,
        Json(json!({"error": err.to_string(), "code": err.code()})),
    )
}
