#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # portal
//!
//! Local workspace server that can publish itself through a Cloudflare
//! tunnel driven by the external `cloudflared` client.
//!
//! ## Subcommands
//!
//! - `portal serve` (default): run the HTTP server; `--tunnel` starts the
//!   tunnel once the listener is bound
//! - `portal resolve`: locate or download `cloudflared` and print its path
//!
//! ## API surface
//!
//! | Method | Path                | Auth | Description                    |
//! |--------|---------------------|------|--------------------------------|
//! | GET    | `/api/health`       | No   | Liveness probe + tunnel summary|
//! | GET    | `/api/tunnel`       | Yes  | Tunnel status                  |
//! | POST   | `/api/tunnel/start` | Yes  | Start the tunnel               |
//! | POST   | `/api/tunnel/stop`  | Yes  | Stop the tunnel                |
//! | GET    | `/api/events`       | Yes  | SSE stream of status events    |
//!
//! ## Architecture
//!
//! ```text
//! main.rs            entry point, clap subcommands, graceful shutdown
//! auth.rs            Bearer token middleware, constant-time comparison
//! config.rs          TOML + env-var configuration
//! state.rs           AppState, status → event forwarding
//! routes/
//!   health.rs        GET /api/health
//!   tunnel.rs        GET /api/tunnel, POST /api/tunnel/{start,stop}
//!   events.rs        GET /api/events (SSE)
//! tunnel/
//!   platform.rs      OS/arch detection, release asset table
//!   resolver.rs      search path → cache → download + verification
//!   url.rs           public URL detection in client output
//!   process.rs       one cloudflared child: spawn, URL wait, stop
//!   orchestrator.rs  single-slot state machine and status listeners
//! ```

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use portal::config::Config;
use portal::tunnel::{BinaryResolver, CommandLauncher, TunnelOrchestrator};
use portal::{routes, AppState};

/// Local workspace server with a managed Cloudflare tunnel.
#[derive(Parser)]
#[command(name = "portal", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default when no subcommand given).
    Serve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
        /// Start the tunnel once the server is listening.
        #[arg(long)]
        tunnel: bool,
    },
    /// Locate or download cloudflared and print its path.
    Resolve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config_path, command) = match cli.command {
        Some(Commands::Serve { config, tunnel }) => (config, Mode::Serve { tunnel }),
        Some(Commands::Resolve { config }) => (config, Mode::Resolve),
        None => (None, Mode::Serve { tunnel: false }),
    };

    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("portal: {e}");
            return ExitCode::FAILURE;
        }
    };

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let result = match command {
        Mode::Serve { tunnel } => run_server(config, tunnel).await,
        Mode::Resolve => run_resolve(&config).await,
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

enum Mode {
    Serve { tunnel: bool },
    Resolve,
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

async fn run_resolve(config: &Config) -> Result<(), BoxError> {
    let resolver = BinaryResolver::new(config.resolver_options())?;
    let resolved = resolver.resolve().await?;
    info!(
        "Resolved {} for {}/{} ({:?})",
        resolved.path.display(),
        resolved.os,
        resolved.arch,
        resolved.source
    );
    println!("{}", resolved.path.display());
    Ok(())
}

async fn run_server(config: Config, start_tunnel: bool) -> Result<(), BoxError> {
    info!("portal v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", config.server.listen);

    if config.auth.api_key == "change-me" {
        warn!("Using default API key, set PORTAL_API_KEY or update config");
    }

    let server_running = Arc::new(AtomicBool::new(false));
    let orchestrator = TunnelOrchestrator::new(
        BinaryResolver::new(config.resolver_options())?,
        Arc::new(CommandLauncher),
        server_running.clone(),
        config.orchestrator_options(),
    );
    let auto_start = start_tunnel || config.tunnel.auto_start;
    let state = AppState::new(config, orchestrator, server_running.clone());
    let app = routes::router(state.clone());

    let listener = TcpListener::bind(&state.config.server.listen)
        .await
        .map_err(|e| format!("Failed to bind {}: {e}", state.config.server.listen))?;
    server_running.store(true, Ordering::SeqCst);
    info!("Server ready");

    if auto_start {
        let orchestrator = state.orchestrator.clone();
        tokio::spawn(async move { orchestrator.auto_start().await });
    }

    // Readiness, event streams and the tunnel go down before axum drains
    // open connections.
    let draining = state.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            draining.shutdown().await;
        })
        .await;

    // No-op after the signal path; still needed when serve itself failed.
    state.shutdown().await;
    served?;
    info!("Goodbye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
