//! Error taxonomy for the tunnel subsystem.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// The tunnel client binary could not be obtained or verified.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("failed to download {url}: {reason}")]
    Download { url: String, reason: String },
    #[error("binary verification failed: {0}")]
    Verification(String),
    #[error("no tunnel client build for {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },
}

/// The tunnel process could not be started or produced no public URL.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("invalid tunnel config: {0}")]
    InvalidConfig(String),
    #[error("tunnel authentication failed (exit code {exit_code}): {output}")]
    AuthFailed { exit_code: i32, output: String },
    #[error("tunnel process exited with code {exit_code} before reporting a URL")]
    ExitedEarly { exit_code: i32, output: String },
    #[error("no tunnel URL within {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("failed to spawn tunnel process: {0}")]
    SpawnFailed(#[source] io::Error),
}

impl ProcessError {
    /// Spawn failed because the executable itself is unusable (missing,
    /// not executable, or built for another architecture).
    #[must_use]
    pub fn is_not_runnable(&self) -> bool {
        let Self::SpawnFailed(e) = self else {
            return false;
        };
        // ENOEXEC on POSIX, ERROR_BAD_EXE_FORMAT on Windows.
        let bad_format = if cfg!(windows) { 193 } else { 8 };
        matches!(
            e.kind(),
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
        ) || e.raw_os_error() == Some(bad_format)
    }
}

/// A start request violated a precondition. Nothing was changed.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("host server is not running")]
    ServerNotRunning,
    #[error("a tunnel is already active")]
    AlreadyRunning,
    #[error("tunnel start was cancelled by a stop request")]
    Cancelled,
}

/// Any failure surfaced by [`crate::tunnel::TunnelOrchestrator`].
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

impl TunnelError {
    /// Stable machine-readable code for API responses.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Resolution(ResolutionError::Download { .. }) => "DOWNLOAD_FAILED",
            Self::Resolution(ResolutionError::Verification(_)) => "VERIFICATION_FAILED",
            Self::Resolution(ResolutionError::UnsupportedPlatform { .. }) => "UNSUPPORTED_PLATFORM",
            Self::Process(ProcessError::InvalidConfig(_)) => "INVALID_CONFIG",
            Self::Process(ProcessError::AuthFailed { .. }) => "AUTH_FAILED",
            Self::Process(ProcessError::ExitedEarly { .. }) => "EXITED_EARLY",
            Self::Process(ProcessError::Timeout(_)) => "TIMEOUT",
            Self::Process(ProcessError::SpawnFailed(_)) => "SPAWN_FAILED",
            Self::Orchestrator(OrchestratorError::ServerNotRunning) => "SERVER_NOT_RUNNING",
            Self::Orchestrator(OrchestratorError::AlreadyRunning) => "ALREADY_RUNNING",
            Self::Orchestrator(OrchestratorError::Cancelled) => "CANCELLED",
        }
    }
}
