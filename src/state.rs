//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};
use tracing::info;

use crate::config::Config;
use crate::tunnel::TunnelOrchestrator;

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Shared application state for the portal server.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    /// Owner of the primary tunnel.
    pub orchestrator: TunnelOrchestrator,
    /// Broadcast channel for server events. SSE clients subscribe to it.
    pub events: broadcast::Sender<Value>,
    /// Set once the listener is bound, cleared on shutdown.
    pub server_running: Arc<AtomicBool>,
    /// Current number of SSE connections (for connection limiting).
    pub sse_connections: Arc<AtomicU32>,
    /// Flipped to `true` once shutdown begins. Long-lived streams end on it.
    pub shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    /// Wire up state around `orchestrator`, forwarding every tunnel status
    /// transition onto the event channel.
    ///
    /// `server_running` must be the same flag the orchestrator was built with.
    pub fn new(
        config: Config,
        orchestrator: TunnelOrchestrator,
        server_running: Arc<AtomicBool>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let tx = events.clone();
        orchestrator.on_status_changed(move |status| {
            // No subscribers is fine.
            let _ = tx.send(json!({
                "type": "tunnel.status",
                "data": status,
            }));
        });
        Self {
            config: Arc::new(config),
            start_time: Instant::now(),
            orchestrator,
            events,
            server_running,
            sse_connections: Arc::new(AtomicU32::new(0)),
            shutdown: Arc::new(watch::Sender::new(false)),
        }
    }

    /// Begin shutdown: refuse new tunnel starts, end open event streams and
    /// stop the tunnel. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.server_running.store(false, Ordering::SeqCst);
        if !self.shutdown.send_replace(true) {
            info!("Shutting down...");
        }
        self.orchestrator.stop_tunnel().await;
    }
}
