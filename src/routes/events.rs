//! Server-Sent Events (SSE) endpoint.
//!
//! `GET /api/events` streams everything sent on [`AppState::events`]. Each
//! event's SSE name is its `type` field, e.g. `tunnel.status`. Streams end
//! when shutdown begins so graceful shutdown is not held open by clients.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;

use crate::AppState;

/// Maximum concurrent SSE connections before rejecting with 429.
const MAX_SSE_CONNECTIONS: u32 = 64;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Holds one slot of the SSE connection budget until dropped.
struct ConnectionSlot(Arc<AtomicU32>);

impl ConnectionSlot {
    fn acquire(counter: &Arc<AtomicU32>) -> Option<Self> {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < MAX_SSE_CONNECTIONS).then_some(n + 1)
            })
            .ok()
            .map(|_| Self(Arc::clone(counter)))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// `GET /api/events`: SSE event stream.
pub async fn event_stream(State(state): State<AppState>) -> impl IntoResponse {
    let Some(slot) = ConnectionSlot::acquire(&state.sse_connections) else {
        return Err((StatusCode::TOO_MANY_REQUESTS, "Too many SSE connections"));
    };
    let rx = state.events.subscribe();
    let shutdown = state.shutdown.subscribe();

    // The slot lives in the stream state and is released when the client goes away.
    let stream = futures::stream::unfold(
        (rx, shutdown, slot),
        |(mut rx, mut shutdown, slot)| async move {
            let event = next_event(&mut rx, &mut shutdown).await?;
            Some((Ok::<_, Infallible>(event), (rx, shutdown, slot)))
        },
    );

    Ok(Sse::new(stream).keep_alive(KeepAlive::default().interval(KEEP_ALIVE_INTERVAL)))
}

async fn next_event(
    rx: &mut broadcast::Receiver<Value>,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<Event> {
    let received = tokio::select! {
        biased;
        _ = shutdown.wait_for(|stopping| *stopping) => return None,
        received = rx.recv() => received,
    };
    match received {
        Ok(value) => Some(to_event(&value)),
        Err(RecvError::Lagged(n)) => Some(
            Event::default()
                .event("error")
                .data(format!(r#"{{"code":"LAGGED","missed":{n}}}"#)),
        ),
        Err(RecvError::Closed) => None,
    }
}

fn to_event(value: &Value) -> Event {
    let name = value["type"].as_str().unwrap_or("message");
    Event::default()
        .event(name)
        .data(serde_json::to_string(value).unwrap_or_default())
}
