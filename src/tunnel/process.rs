//! A single supervised `cloudflared` process.
//!
//! [`TunnelProcess::spawn`] starts the client with a mode-specific argument
//! vector and attaches three background tasks:
//!
//! - **stdout / stderr readers**: drain both pipes line by line for the whole
//!   life of the child (a full pipe would stall it), keep a bounded transcript
//!   for diagnostics, and publish the first public URL they see.
//! - **exit watcher**: owns the [`Child`], publishes its exit code and serves
//!   kill requests. Dropping the [`TunnelProcess`] closes the kill channel,
//!   which kills the child.
//!
//! [`TunnelProcess::wait_for_url`] races URL detection against process exit
//! and a deadline. [`TunnelProcess::stop`] is SIGTERM, a grace period, then
//! SIGKILL.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::tunnel::error::ProcessError;
use crate::tunnel::types::{TunnelConfig, TunnelMode};
use crate::tunnel::url::extract_url;

/// `CREATE_NO_WINDOW` process creation flag.
#[cfg(windows)]
pub(crate) const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Default URL-detection deadline.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(60);

/// Default wait between SIGTERM and SIGKILL.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Bounded wait for the child to be reaped after SIGKILL.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Upper bound for the `tunnel token` step.
const AUTH_TIMEOUT: Duration = Duration::from_secs(30);

/// How long an early exit waits for the readers to flush the last lines.
const DRAIN_WAIT: Duration = Duration::from_secs(1);

/// Transcript cap. Older output is dropped first.
const MAX_CAPTURED_OUTPUT: usize = 64 * 1024;

/// Starts OS processes for the tunnel client.
pub trait Launch: Send + Sync {
    /// Spawn `program` with `args` and piped stdout/stderr.
    fn launch(&self, program: &Path, args: &[String]) -> std::io::Result<Child>;
}

/// [`Launch`] that executes the program directly, without a shell.
pub struct CommandLauncher;

impl Launch for CommandLauncher {
    fn launch(&self, program: &Path, args: &[String]) -> std::io::Result<Child> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);
        cmd.spawn()
    }
}

/// Argument vector for the long-running tunnel process.
///
/// - quick: `--no-autoupdate tunnel --url http://localhost:<port>`
/// - named: `--no-autoupdate tunnel run <name>`
pub fn build_args(config: &TunnelConfig) -> Result<Vec<String>, ProcessError> {
    if config.local_port == 0 {
        return Err(ProcessError::InvalidConfig(
            "local_port must be a positive port number".into(),
        ));
    }
    match config.tunnel_name.as_deref() {
        Some(name) if name.trim().is_empty() => Err(ProcessError::InvalidConfig(
            "tunnel_name must not be empty".into(),
        )),
        Some(name) => Ok(vec![
            "--no-autoupdate".to_string(),
            "tunnel".to_string(),
            "run".to_string(),
            name.to_string(),
        ]),
        None => Ok(vec![
            "--no-autoupdate".to_string(),
            "tunnel".to_string(),
            "--url".to_string(),
            format!("http://localhost:{}", config.local_port),
        ]),
    }
}

/// Argument vector for the one-shot authentication step.
pub fn auth_args(token: &str) -> Vec<String> {
    vec!["tunnel".to_string(), "token".to_string(), token.to_string()]
}

/// A running (or exited) tunnel client process.
pub struct TunnelProcess {
    pid: Option<u32>,
    mode: TunnelMode,
    url_rx: watch::Receiver<Option<String>>,
    exit_rx: watch::Receiver<Option<i32>>,
    kill_tx: mpsc::Sender<()>,
    output: Arc<Mutex<String>>,
    readers: Mutex<Vec<JoinHandle<()>>>,
    grace_period: Duration,
}

impl TunnelProcess {
    /// Validate `config`, run the auth step if a token is set, and spawn the
    /// tunnel client. Returns as soon as the process exists.
    pub async fn spawn(
        launcher: &dyn Launch,
        binary: &Path,
        config: &TunnelConfig,
    ) -> Result<Self, ProcessError> {
        let args = build_args(config)?;
        let mode = config.mode();

        if let Some(token) = config.auth_token.as_deref().filter(|t| !t.is_empty()) {
            authenticate(launcher, binary, token).await?;
        }

        let mut child = launcher
            .launch(binary, &args)
            .map_err(ProcessError::SpawnFailed)?;
        let pid = child.id();
        info!(
            "Started {} tunnel: {} {} (pid {pid:?})",
            mode.as_str(),
            binary.display(),
            args.join(" ")
        );

        let (url_tx, url_rx) = watch::channel(None);
        let url_tx = Arc::new(url_tx);
        let output = Arc::new(Mutex::new(String::new()));

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(drain_lines(
                stdout,
                Arc::clone(&url_tx),
                Arc::clone(&output),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(drain_lines(
                stderr,
                Arc::clone(&url_tx),
                Arc::clone(&output),
            )));
        }
        drop(url_tx);

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = mpsc::channel(1);
        tokio::spawn(watch_exit(child, pid, exit_tx, kill_rx));

        Ok(Self {
            pid,
            mode,
            url_rx,
            exit_rx,
            kill_tx,
            output,
            readers: Mutex::new(readers),
            grace_period: DEFAULT_GRACE_PERIOD,
        })
    }

    /// Spawn and wait for the public URL. On failure the child is gone.
    pub async fn start(
        launcher: &dyn Launch,
        binary: &Path,
        config: &TunnelConfig,
        deadline: Duration,
    ) -> Result<(Self, String), ProcessError> {
        let process = Self::spawn(launcher, binary, config).await?;
        let url = process.wait_for_url(deadline).await?;
        Ok((process, url))
    }

    /// Override the SIGTERM → SIGKILL grace period.
    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn mode(&self) -> TunnelMode {
        self.mode
    }

    /// URL detected so far, if any.
    pub fn public_url(&self) -> Option<String> {
        self.url_rx.borrow().clone()
    }

    /// Exit code once the process has exited (`-1` when killed by a signal).
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_rx.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_code().is_some()
    }

    /// Captured stdout/stderr transcript.
    pub fn output(&self) -> String {
        self.output
            .lock()
            .map(|o| o.clone())
            .unwrap_or_default()
    }

    /// Wait for the first public URL.
    ///
    /// Fails with `ExitedEarly` if the process exits first, or kills the
    /// process and fails with `Timeout` once `deadline` elapses.
    pub async fn wait_for_url(&self, deadline: Duration) -> Result<String, ProcessError> {
        let mut url_rx = self.url_rx.clone();
        let url_found = async move {
            let url = url_rx
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|u| (*u).clone());
            match url {
                Some(url) => url,
                // Both pipes closed without a URL; the exit branch decides.
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            url = url_found => {
                info!("Tunnel URL detected: {url}");
                Ok(url)
            }
            code = self.wait_exit() => {
                self.drain_readers(DRAIN_WAIT).await;
                let output = self.output();
                warn!("Tunnel process exited with code {code} before reporting a URL");
                Err(ProcessError::ExitedEarly { exit_code: code, output })
            }
            () = tokio::time::sleep(deadline) => {
                warn!(
                    "No tunnel URL after {}ms, killing process",
                    deadline.as_millis()
                );
                self.kill().await;
                Err(ProcessError::Timeout(deadline))
            }
        }
    }

    /// Resolve once the process has exited, returning its exit code.
    pub async fn wait_exit(&self) -> i32 {
        let mut exit_rx = self.exit_rx.clone();
        let code = exit_rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|c| *c);
        code.unwrap_or(-1)
    }

    /// Stop the process: SIGTERM, up to the grace period, then SIGKILL.
    ///
    /// Safe to call repeatedly or on an exited process. Never fails; problems
    /// are logged.
    pub async fn stop(&self) {
        if self.has_exited() {
            debug!("Tunnel process already exited, nothing to stop");
            self.abort_readers();
            return;
        }

        if self.terminate() {
            if tokio::time::timeout(self.grace_period, self.wait_exit())
                .await
                .is_ok()
            {
                info!("Tunnel process {:?} stopped", self.pid);
                self.abort_readers();
                return;
            }
            warn!(
                "Tunnel process {:?} still running after {}s, killing",
                self.pid,
                self.grace_period.as_secs_f64()
            );
        }
        self.kill().await;
        self.abort_readers();
    }

    /// Send the graceful termination signal. Returns false when there is no
    /// graceful path and the caller should kill directly.
    #[cfg(unix)]
    fn terminate(&self) -> bool {
        let Some(pid) = self.pid else { return false };
        #[allow(clippy::cast_possible_wrap)]
        let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if ret != 0 {
            debug!(
                "SIGTERM to {pid} failed: {}",
                std::io::Error::last_os_error()
            );
        }
        ret == 0
    }

    #[cfg(not(unix))]
    fn terminate(&self) -> bool {
        false
    }

    /// Kill the process and wait (bounded) for it to be reaped.
    async fn kill(&self) {
        if self.kill_tx.try_send(()).is_err() && !self.has_exited() {
            debug!("Kill request already pending for {:?}", self.pid);
        }
        if tokio::time::timeout(KILL_WAIT, self.wait_exit()).await.is_err() {
            error!("Tunnel process {:?} did not exit after kill", self.pid);
        }
    }

    async fn drain_readers(&self, limit: Duration) {
        let readers: Vec<_> = self
            .readers
            .lock()
            .map(|mut r| r.drain(..).collect())
            .unwrap_or_default();
        let all = futures::future::join_all(readers);
        if tokio::time::timeout(limit, all).await.is_err() {
            debug!("Output readers still open after exit");
        }
    }

    fn abort_readers(&self) {
        if let Ok(mut readers) = self.readers.lock() {
            for reader in readers.drain(..) {
                reader.abort();
            }
        }
    }
}

/// Run `cloudflared tunnel token <token>` to completion.
async fn authenticate(
    launcher: &dyn Launch,
    binary: &Path,
    token: &str,
) -> Result<(), ProcessError> {
    info!("Authenticating tunnel client");
    let child = launcher
        .launch(binary, &auth_args(token))
        .map_err(ProcessError::SpawnFailed)?;
    match tokio::time::timeout(AUTH_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(out)) if out.status.success() => Ok(()),
        Ok(Ok(out)) => {
            let output = format!(
                "{}{}",
                String::from_utf8_lossy(&out.stdout),
                String::from_utf8_lossy(&out.stderr)
            );
            Err(ProcessError::AuthFailed {
                exit_code: out.status.code().unwrap_or(-1),
                output: output.trim().to_string(),
            })
        }
        Ok(Err(e)) => Err(ProcessError::SpawnFailed(e)),
        Err(_) => Err(ProcessError::AuthFailed {
            exit_code: -1,
            output: format!("timed out after {}s", AUTH_TIMEOUT.as_secs()),
        }),
    }
}

/// Read one pipe until EOF, capturing output and publishing the first URL.
async fn drain_lines(
    stream: impl AsyncRead + Unpin,
    url_tx: Arc<watch::Sender<Option<String>>>,
    output: Arc<Mutex<String>>,
) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::with_capacity(512);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                debug!(target: "portal::cloudflared", "{line}");
                if let Ok(mut out) = output.lock() {
                    push_capped(&mut out, line);
                }
                if url_tx.borrow().is_some() {
                    continue;
                }
                if let Some(url) = extract_url(line) {
                    url_tx.send_if_modified(|current| {
                        if current.is_none() {
                            *current = Some(url);
                            true
                        } else {
                            false
                        }
                    });
                }
            }
        }
    }
}

/// Own the child until it exits or a kill is requested.
async fn watch_exit(
    mut child: Child,
    pid: Option<u32>,
    exit_tx: watch::Sender<Option<i32>>,
    mut kill_rx: mpsc::Receiver<()>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        // Either an explicit kill or the owning TunnelProcess was dropped.
        _ = kill_rx.recv() => {
            if let Err(e) = child.start_kill() {
                debug!("Kill of {pid:?} failed: {e}");
            }
            child.wait().await
        }
    };
    let code = match status {
        Ok(s) => s.code().unwrap_or(-1),
        Err(e) => {
            error!("Tunnel process {pid:?} wait error: {e}");
            -1
        }
    };
    info!("Tunnel process {pid:?} exited with code {code}");
    exit_tx.send_replace(Some(code));
}

fn push_capped(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
    if out.len() > MAX_CAPTURED_OUTPUT {
        let mut cut = out.len() - MAX_CAPTURED_OUTPUT;
        while !out.is_char_boundary(cut) {
            cut += 1;
        }
        out.drain(..cut);
    }
}
