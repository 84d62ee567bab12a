//! Scripted fake tunnel clients for tests.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::tunnel::orchestrator::{OrchestratorOptions, TunnelOrchestrator};
use crate::tunnel::platform::{Arch, Os, Platform, DEFAULT_DOWNLOAD_BASE};
use crate::tunnel::process::Launch;
use crate::tunnel::resolver::{BinaryResolver, ResolverOptions};
use crate::tunnel::types::TunnelConfig;

/// Runs `/bin/sh -c <script>` instead of the requested program. The script
/// is chosen from the argument vector; every call is counted and recorded.
pub struct ScriptLauncher {
    calls: AtomicUsize,
    args: Mutex<Vec<Vec<String>>>,
    script: Box<dyn Fn(&[String]) -> String + Send + Sync>,
}

impl ScriptLauncher {
    pub fn new(script: impl Fn(&[String]) -> String + Send + Sync + 'static) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            args: Mutex::new(Vec::new()),
            script: Box::new(script),
        }
    }

    /// Same script for every launch.
    pub fn fixed(script: &str) -> Self {
        let script = script.to_string();
        Self::new(move |_| script.clone())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn recorded_args(&self) -> Vec<Vec<String>> {
        self.args.lock().unwrap().clone()
    }
}

impl Launch for ScriptLauncher {
    fn launch(&self, _program: &Path, args: &[String]) -> std::io::Result<Child> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.args.lock().unwrap().push(args.to_vec());
        Command::new("/bin/sh")
            .arg("-c")
            .arg((self.script)(args))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

/// Probe that reports the bare program name as present on the search path.
pub struct OnSearchPath(pub bool);

#[async_trait::async_trait]
impl crate::tunnel::resolver::Probe for OnSearchPath {
    async fn probe(&self, program: &Path) -> bool {
        self.0 && !program.is_absolute()
    }
}

/// Fetcher for tests that must never download.
pub struct RefuseFetch;

#[async_trait::async_trait]
impl crate::tunnel::resolver::Fetch for RefuseFetch {
    async fn fetch(
        &self,
        _url: &str,
        _dest: &mut (dyn tokio::io::AsyncWrite + Unpin + Send),
    ) -> Result<u64, String> {
        Err("network disabled in tests".into())
    }
}

/// An orchestrator whose processes are shell scripts and whose resolver
/// never touches the network.
pub struct Scripted {
    pub orchestrator: TunnelOrchestrator,
    pub launcher: Arc<ScriptLauncher>,
    pub server_running: Arc<AtomicBool>,
    _cache: tempfile::TempDir,
}

/// `on_path` decides whether `cloudflared` is "found" on the search path;
/// otherwise resolution fails with a download error.
pub fn scripted(launcher: ScriptLauncher, on_path: bool, start_timeout: Duration) -> Scripted {
    let cache = tempfile::tempdir().unwrap();
    let resolver = BinaryResolver::with_parts(
        ResolverOptions {
            binary_name: "cloudflared".into(),
            cache_dir: cache.path().to_path_buf(),
            download_base: DEFAULT_DOWNLOAD_BASE.into(),
        },
        Arc::new(RefuseFetch),
        Arc::new(OnSearchPath(on_path)),
    )
    .with_platform(Platform {
        os: Os::Linux,
        arch: Arch::Amd64,
    });
    let launcher = Arc::new(launcher);
    let server_running = Arc::new(AtomicBool::new(true));
    let orchestrator = TunnelOrchestrator::new(
        resolver,
        launcher.clone(),
        server_running.clone(),
        OrchestratorOptions {
            default_config: TunnelConfig::quick(8080),
            start_timeout,
            grace_period: Duration::from_secs(1),
        },
    );
    Scripted {
        orchestrator,
        launcher,
        server_running,
        _cache: cache,
    }
}
