//! Single-slot tunnel coordinator.
//!
//! [`TunnelOrchestrator`] owns the resolver, the cached binary path and at
//! most one [`TunnelProcess`]. All state transitions happen under one lock:
//!
//! ```text
//! Idle ─▶ Resolving ─▶ Starting ─▶ Running ─▶ Stopping ─▶ Idle
//!            │             │           │
//!            └─────────────┴───────────┴──▶ Idle (last_error set)
//! ```
//!
//! Every transition is delivered to the registered listeners while the lock
//! is held, so listeners observe transitions in order. Listeners must be
//! quick and must not call back into the orchestrator.
//!
//! Each start attempt gets a generation number. `stop_tunnel` bumps it, so a
//! start that is still resolving or waiting for its URL notices it was
//! superseded and never publishes `Running` after the `Idle` that ended it.
//! Attempts run on their own task, so a caller that stops waiting never
//! leaves the slot stuck in `Resolving` or `Starting`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::tunnel::error::{OrchestratorError, ResolutionError, TunnelError};
use crate::tunnel::process::{build_args, Launch, TunnelProcess};
use crate::tunnel::resolver::BinaryResolver;
use crate::tunnel::types::{epoch_secs, ResolvedBinary, TunnelConfig, TunnelState, TunnelStatus};

/// Callback receiving every status transition.
pub type StatusListener = Box<dyn Fn(&TunnelStatus) + Send + Sync>;

/// Tunables read from the persistent configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Used when `start_tunnel` is called without a config.
    pub default_config: TunnelConfig,
    /// URL-detection deadline.
    pub start_timeout: Duration,
    /// SIGTERM → SIGKILL grace period on stop.
    pub grace_period: Duration,
}

/// Handle to one orchestrator. Clones share state; separately constructed
/// orchestrators are fully independent.
#[derive(Clone)]
pub struct TunnelOrchestrator {
    shared: Arc<Shared>,
}

struct Shared {
    inner: Mutex<Inner>,
    listeners: RwLock<Vec<StatusListener>>,
    resolver: BinaryResolver,
    resolved: tokio::sync::Mutex<Option<ResolvedBinary>>,
    launcher: Arc<dyn Launch>,
    server_running: Arc<AtomicBool>,
    options: OrchestratorOptions,
}

#[derive(Default)]
struct Inner {
    status: TunnelStatus,
    process: Option<Arc<TunnelProcess>>,
    attempt: u64,
}

impl TunnelOrchestrator {
    pub fn new(
        resolver: BinaryResolver,
        launcher: Arc<dyn Launch>,
        server_running: Arc<AtomicBool>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                listeners: RwLock::new(Vec::new()),
                resolver,
                resolved: tokio::sync::Mutex::new(None),
                launcher,
                server_running,
                options,
            }),
        }
    }

    /// Register a listener for every status transition.
    pub fn on_status_changed(&self, listener: impl Fn(&TunnelStatus) + Send + Sync + 'static) {
        if let Ok(mut listeners) = self.shared.listeners.write() {
            listeners.push(Box::new(listener));
        }
    }

    /// Current status snapshot.
    pub fn get_status(&self) -> TunnelStatus {
        self.lock().status.clone()
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.shared.options
    }

    /// Start the primary tunnel and wait for its public URL.
    ///
    /// `None` uses the configured default (quick mode on the local port).
    /// `ServerNotRunning` and `AlreadyRunning` are reported to listeners on
    /// a snapshot carrying `last_error`, without touching the active tunnel.
    /// Every other failure returns the orchestrator to `Idle` with
    /// `last_error` set, so the call can simply be retried.
    ///
    /// The attempt runs in a task owned by the orchestrator. Dropping the
    /// returned future does not abandon it: it still ends in `Running` or
    /// `Idle`.
    pub async fn start_tunnel(
        &self,
        config: Option<TunnelConfig>,
    ) -> Result<TunnelStatus, TunnelError> {
        let config = config.unwrap_or_else(|| self.shared.options.default_config.clone());

        let attempt = {
            let mut inner = self.lock();
            if !self.shared.server_running.load(Ordering::SeqCst) {
                let err = OrchestratorError::ServerNotRunning;
                warn!("Tunnel start rejected: {err}");
                if inner.status.state == TunnelState::Idle {
                    inner.status.last_error = Some(err.to_string());
                    self.emit(&inner.status);
                } else {
                    self.emit_rejection(&inner.status, &err);
                }
                return Err(err.into());
            }
            if inner.status.state != TunnelState::Idle {
                let err = OrchestratorError::AlreadyRunning;
                warn!(
                    "Tunnel start rejected: already {}",
                    inner.status.state.as_str()
                );
                self.emit_rejection(&inner.status, &err);
                return Err(err.into());
            }
            if let Err(e) = build_args(&config) {
                warn!("Tunnel start rejected: {e}");
                inner.status.last_error = Some(e.to_string());
                self.emit(&inner.status);
                return Err(e.into());
            }
            inner.attempt += 1;
            inner.status = TunnelStatus {
                state: TunnelState::Resolving,
                mode: Some(config.mode()),
                ..TunnelStatus::default()
            };
            self.emit(&inner.status);
            inner.attempt
        };

        let this = self.clone();
        let task = tokio::spawn(async move { this.run_attempt(attempt, config).await });
        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!("Tunnel start task failed: {e}");
                Err(self.fail(attempt, OrchestratorError::Cancelled.into()).await)
            }
        }
    }

    async fn run_attempt(
        &self,
        attempt: u64,
        config: TunnelConfig,
    ) -> Result<TunnelStatus, TunnelError> {
        let binary: PathBuf = match &config.binary_path {
            Some(path) => path.clone(),
            None => match self.resolve_binary().await {
                Ok(resolved) => resolved.path,
                Err(e) => return Err(self.fail(attempt, e.into()).await),
            },
        };

        {
            let mut inner = self.lock();
            if inner.attempt != attempt {
                return Err(OrchestratorError::Cancelled.into());
            }
            inner.status.state = TunnelState::Starting;
            self.emit(&inner.status);
        }

        let spawned = TunnelProcess::spawn(&*self.shared.launcher, &binary, &config).await;
        let process = match spawned {
            Ok(p) => Arc::new(p.with_grace_period(self.shared.options.grace_period)),
            Err(e) => {
                if e.is_not_runnable() && config.binary_path.is_none() {
                    warn!("Cached tunnel binary is not runnable, will re-resolve next start");
                    self.invalidate_binary().await;
                }
                return Err(self.fail(attempt, e.into()).await);
            }
        };

        let superseded = {
            let mut inner = self.lock();
            if inner.attempt == attempt {
                inner.process = Some(Arc::clone(&process));
                inner.status.pid = process.pid();
                self.emit(&inner.status);
                false
            } else {
                true
            }
        };
        if superseded {
            process.stop().await;
            return Err(OrchestratorError::Cancelled.into());
        }

        let url = match process.wait_for_url(self.shared.options.start_timeout).await {
            Ok(url) => url,
            Err(e) => {
                process.stop().await;
                return Err(self.fail(attempt, e.into()).await);
            }
        };

        let snapshot = {
            let mut inner = self.lock();
            if inner.attempt != attempt {
                return Err(OrchestratorError::Cancelled.into());
            }
            inner.status.state = TunnelState::Running;
            inner.status.running = true;
            inner.status.public_url = Some(url.clone());
            inner.status.started_at = Some(epoch_secs());
            self.emit(&inner.status);
            inner.status.clone()
        };
        info!("Tunnel running at {url}");
        self.watch_unexpected_exit(attempt, process);
        Ok(snapshot)
    }

    /// Stop the primary tunnel. No-op when idle; never fails.
    pub async fn stop_tunnel(&self) -> TunnelStatus {
        let process = {
            let mut inner = self.lock();
            match inner.status.state {
                TunnelState::Idle | TunnelState::Stopping => return inner.status.clone(),
                _ => {}
            }
            inner.attempt += 1;
            inner.status.state = TunnelState::Stopping;
            self.emit(&inner.status);
            inner.process.take()
        };

        if let Some(process) = process {
            info!("Stopping tunnel process {:?}", process.pid());
            process.stop().await;
        }

        let mut inner = self.lock();
        inner.status = TunnelStatus::default();
        self.emit(&inner.status);
        inner.status.clone()
    }

    /// Auto-start policy: start with the default config, report failures
    /// through the status channel and the log only.
    pub async fn auto_start(&self) {
        match self.start_tunnel(None).await {
            Ok(status) => info!(
                "Tunnel auto-started: {}",
                status.public_url.as_deref().unwrap_or("<no url>")
            ),
            Err(e) => error!("Tunnel auto-start failed: {e}"),
        }
    }

    /// Resolve the tunnel binary, reusing the cached result.
    pub async fn resolve_binary(&self) -> Result<ResolvedBinary, ResolutionError> {
        let mut cached = self.shared.resolved.lock().await;
        if let Some(resolved) = cached.as_ref() {
            return Ok(resolved.clone());
        }
        let resolved = self.shared.resolver.resolve().await?;
        info!(
            "Resolved tunnel binary {} ({}/{}, {:?})",
            resolved.path.display(),
            resolved.os,
            resolved.arch,
            resolved.source
        );
        *cached = Some(resolved.clone());
        Ok(resolved)
    }

    async fn invalidate_binary(&self) {
        *self.shared.resolved.lock().await = None;
    }

    /// Return to `Idle` with `last_error`, unless `stop_tunnel` already
    /// superseded this attempt.
    async fn fail(&self, attempt: u64, err: TunnelError) -> TunnelError {
        let process = {
            let mut inner = self.lock();
            if inner.attempt != attempt {
                return OrchestratorError::Cancelled.into();
            }
            warn!("Tunnel start failed: {err}");
            let process = inner.process.take();
            inner.status = TunnelStatus {
                last_error: Some(err.to_string()),
                ..TunnelStatus::default()
            };
            self.emit(&inner.status);
            process
        };
        if let Some(process) = process {
            process.stop().await;
        }
        err
    }

    /// While running, turn an exit nobody asked for into `Idle` + `last_error`.
    fn watch_unexpected_exit(&self, attempt: u64, process: Arc<TunnelProcess>) {
        let this = self.clone();
        tokio::spawn(async move {
            let code = process.wait_exit().await;
            let mut inner = this.lock();
            if inner.attempt != attempt || inner.status.state != TunnelState::Running {
                return;
            }
            warn!("Tunnel process exited unexpectedly with code {code}");
            inner.attempt += 1;
            inner.process = None;
            inner.status = TunnelStatus {
                last_error: Some(format!("tunnel process exited with code {code}")),
                ..TunnelStatus::default()
            };
            this.emit(&inner.status);
        });
    }

    /// Tell listeners about a rejected start without changing the stored
    /// status.
    fn emit_rejection(&self, current: &TunnelStatus, err: &OrchestratorError) {
        self.emit(&TunnelStatus {
            last_error: Some(err.to_string()),
            ..current.clone()
        });
    }

    fn emit(&self, status: &TunnelStatus) {
        if let Ok(listeners) = self.shared.listeners.read() {
            for listener in listeners.iter() {
                listener(status);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // State is always left consistent before any code that can panic.
        self.shared
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
