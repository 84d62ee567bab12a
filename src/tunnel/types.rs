//! Data types shared by the resolver, the tunnel process and the orchestrator.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Input to a tunnel start request.
///
/// An absent `tunnel_name` selects quick mode. A present name must be
/// non-empty after trimming, otherwise the start is rejected before any
/// process is spawned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Local port exposed through the tunnel.
    pub local_port: u16,
    /// Pre-registered tunnel identifier (named mode).
    #[serde(default)]
    pub tunnel_name: Option<String>,
    /// Token passed to `cloudflared tunnel token` before the tunnel starts.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Explicit binary path. Skips resolution when set.
    #[serde(default)]
    pub binary_path: Option<PathBuf>,
    /// Reserved, not consumed.
    #[serde(default)]
    pub subdomain: Option<String>,
    /// Reserved, not consumed.
    #[serde(default)]
    pub host: Option<String>,
}

impl TunnelConfig {
    /// Quick-mode config for `local_port`.
    #[must_use]
    pub fn quick(local_port: u16) -> Self {
        Self {
            local_port,
            ..Self::default()
        }
    }

    /// Mode implied by the config. Does not validate the name.
    #[must_use]
    pub fn mode(&self) -> TunnelMode {
        if self.tunnel_name.is_some() {
            TunnelMode::Named
        } else {
            TunnelMode::Quick
        }
    }
}

/// Quick tunnels get a random provider-assigned hostname; named tunnels are
/// bound to a pre-registered identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelMode {
    Quick,
    Named,
}

impl TunnelMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Named => "named",
        }
    }
}

/// Orchestrator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
    #[default]
    Idle,
    Resolving,
    Starting,
    Running,
    Stopping,
}

impl TunnelState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

/// Snapshot of the primary tunnel, handed to status listeners by value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelStatus {
    pub state: TunnelState,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<TunnelMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Epoch seconds when the tunnel reached `running`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
}

/// Where a resolved binary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BinarySource {
    SearchPath,
    Cache,
    Download,
}

/// A runnable tunnel client executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedBinary {
    /// Either a bare program name (search path) or an absolute path.
    pub path: PathBuf,
    pub os: &'static str,
    pub arch: &'static str,
    /// Passed the `--version` probe.
    pub verified: bool,
    pub source: BinarySource,
}

/// Current time in epoch seconds.
pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
