//! HTTP route handlers.
//!
//! Each sub-module corresponds to an API endpoint group. All handlers except
//! [`health`] require authentication via the [`crate::auth::require_api_key`]
//! middleware.

pub mod events;
pub mod health;
pub mod tunnel;

use axum::{
    middleware,
    routing::{get, post},
    Extension, Router,
};
use tower_http::trace::TraceLayer;

use crate::auth::{self, ApiKey};
use crate::AppState;

/// Build the full API router.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new().route("/api/health", get(health::health));

    let authed_routes = Router::new()
        .route("/api/tunnel", get(tunnel::status))
        .route("/api/tunnel/start", post(tunnel::start))
        .route("/api/tunnel/stop", post(tunnel::stop))
        .route("/api/events", get(events::event_stream))
        .layer(middleware::from_fn(auth::require_api_key));

    Router::new()
        .merge(public_routes)
        .merge(authed_routes)
        .layer(Extension(ApiKey(state.config.auth.api_key.clone())))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, Response};
    use serde_json::Value;

    use crate::config::Config;
    use crate::tunnel::testing::{scripted, ScriptLauncher, Scripted};
    use crate::AppState;

    pub const API_KEY: &str = "test-key";

    pub const SERVE_URL: &str =
        "echo 'your tunnel is available at https://route-test.trycloudflare.com' >&2; exec sleep 30";

    /// App state around a scripted orchestrator. Keep the `Scripted` alive
    /// for the duration of the test.
    pub fn app_state(script: &str) -> (AppState, Scripted) {
        let scripted = scripted(
            ScriptLauncher::fixed(script),
            true,
            Duration::from_secs(5),
        );
        let mut config = Config::default();
        config.auth.api_key = API_KEY.to_string();
        let state = AppState::new(
            config,
            scripted.orchestrator.clone(),
            scripted.server_running.clone(),
        );
        (state, scripted)
    }

    pub fn request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {API_KEY}"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub async fn json_body(response: Response<Body>) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
