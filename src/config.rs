//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables**: `PORTAL_API_KEY`, `PORTAL_LISTEN`,
//!    `PORTAL_TUNNEL_NAME`, `PORTAL_TUNNEL_TOKEN`, `PORTAL_TUNNEL_AUTO_START`
//! 2. **Config file**: path via `--config <path>`, or `portal.toml` in CWD
//! 3. **Compiled defaults**: see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "127.0.0.1:8420"
//!
//! [auth]
//! api_key = "your-secret-key"
//!
//! [logging]
//! level = "info"
//!
//! [tunnel]
//! auto_start = false
//! local_port = 8420                 # defaults to the listen port
//! tunnel_name = "my-tunnel"         # omit for a quick tunnel
//! auth_token = "..."                # runs `cloudflared tunnel token` first
//! binary_path = "/opt/cloudflared"  # skip resolution entirely
//! cache_dir = "~/.cache/portal/bin"
//! start_timeout_secs = 60
//! shutdown_grace_secs = 5
//! download_base_url = "https://github.com/cloudflare/cloudflared/releases/latest/download"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::tunnel::platform::DEFAULT_DOWNLOAD_BASE;
use crate::tunnel::{OrchestratorOptions, ResolverOptions, TunnelConfig};
use crate::util::expand_tilde;

/// Name of the tunnel client executable.
pub const BINARY_NAME: &str = "cloudflared";

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "portal.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub tunnel: TunnelSettings,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `127.0.0.1:8420`).
    #[serde(default = "default_listen")]
    pub listen: String,
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Pre-shared Bearer token. Override with `PORTAL_API_KEY` env var.
    /// Defaults to `"change-me"` which triggers a startup warning.
    #[serde(default = "default_api_key")]
    pub api_key: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Persistent tunnel settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelSettings {
    /// Start the tunnel as soon as the server is listening (default false).
    #[serde(default)]
    pub auto_start: bool,
    /// Port the tunnel forwards to. Defaults to the port of `server.listen`.
    pub local_port: Option<u16>,
    /// Named tunnel; quick mode when absent.
    pub tunnel_name: Option<String>,
    pub auth_token: Option<String>,
    /// Explicit `cloudflared` path; disables search and download.
    pub binary_path: Option<String>,
    /// Where downloaded binaries are kept (default `<user cache>/portal/bin`).
    pub cache_dir: Option<String>,
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_download_base_url")]
    pub download_base_url: String,
}

fn default_listen() -> String {
    "127.0.0.1:8420".to_string()
}
fn default_api_key() -> String {
    "change-me".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_start_timeout_secs() -> u64 {
    60
}
fn default_shutdown_grace_secs() -> u64 {
    5
}
fn default_download_base_url() -> String {
    DEFAULT_DOWNLOAD_BASE.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            auto_start: false,
            local_port: None,
            tunnel_name: None,
            auth_token: None,
            binary_path: None,
            cache_dir: None,
            start_timeout_secs: default_start_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            download_base_url: default_download_base_url(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist. Otherwise `portal.toml` in
    /// the current directory is used when present.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(Path::new(p))?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    /// Env var overrides, looked up through `var`.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("PORTAL_API_KEY") {
            self.auth.api_key = key;
        }
        if let Some(listen) = var("PORTAL_LISTEN") {
            self.server.listen = listen;
        }
        if let Some(name) = var("PORTAL_TUNNEL_NAME") {
            self.tunnel.tunnel_name = Some(name);
        }
        if let Some(token) = var("PORTAL_TUNNEL_TOKEN") {
            self.tunnel.auth_token = Some(token);
        }
        if let Some(flag) = var("PORTAL_TUNNEL_AUTO_START") {
            self.tunnel.auto_start = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
    }

    /// Port component of `server.listen`, if it parses.
    pub fn listen_port(&self) -> Option<u16> {
        self.server
            .listen
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
    }

    /// Default tunnel target built from the `[tunnel]` section.
    pub fn tunnel_config(&self) -> TunnelConfig {
        let t = &self.tunnel;
        TunnelConfig {
            local_port: t.local_port.or_else(|| self.listen_port()).unwrap_or(0),
            tunnel_name: t.tunnel_name.clone(),
            auth_token: t.auth_token.clone(),
            binary_path: t.binary_path.as_deref().map(expand_tilde),
            ..TunnelConfig::default()
        }
    }

    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            binary_name: BINARY_NAME.to_string(),
            cache_dir: self.cache_dir(),
            download_base: self.tunnel.download_base_url.clone(),
        }
    }

    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            default_config: self.tunnel_config(),
            start_timeout: Duration::from_secs(self.tunnel.start_timeout_secs),
            grace_period: Duration::from_secs(self.tunnel.shutdown_grace_secs),
        }
    }

    fn cache_dir(&self) -> PathBuf {
        match self.tunnel.cache_dir.as_deref() {
            Some(dir) => expand_tilde(dir),
            None => dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("portal")
                .join("bin"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::tunnel::TunnelMode;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.listen, "127.0.0.1:8420");
        assert_eq!(config.auth.api_key, "change-me");
        assert!(!config.tunnel.auto_start);

        let tunnel = config.tunnel_config();
        assert_eq!(tunnel.local_port, 8420);
        assert_eq!(tunnel.mode(), TunnelMode::Quick);

        let options = config.orchestrator_options();
        assert_eq!(options.start_timeout, Duration::from_secs(60));
        assert_eq!(options.grace_period, Duration::from_secs(5));

        let resolver = config.resolver_options();
        assert_eq!(resolver.binary_name, "cloudflared");
        assert_eq!(resolver.download_base, DEFAULT_DOWNLOAD_BASE);
        assert!(resolver.cache_dir.ends_with("portal/bin"));
    }

    #[test]
    fn test_parse_tunnel_section() {
        let config: Config = toml::from_str(
            r#"
            [server]
            listen = "0.0.0.0:9000"

            [tunnel]
            auto_start = true
            local_port = 3000
            tunnel_name = "lab"
            binary_path = "/opt/cloudflared"
            cache_dir = "/var/cache/portal"
            start_timeout_secs = 10
            "#,
        )
        .unwrap();

        assert!(config.tunnel.auto_start);
        let tunnel = config.tunnel_config();
        assert_eq!(tunnel.local_port, 3000);
        assert_eq!(tunnel.tunnel_name.as_deref(), Some("lab"));
        assert_eq!(tunnel.binary_path, Some(PathBuf::from("/opt/cloudflared")));
        assert_eq!(
            config.resolver_options().cache_dir,
            PathBuf::from("/var/cache/portal")
        );
        assert_eq!(
            config.orchestrator_options().start_timeout,
            Duration::from_secs(10)
        );
        assert_eq!(config.tunnel.shutdown_grace_secs, 5);
    }

    #[test]
    fn test_local_port_follows_listen() {
        let config: Config = toml::from_str("[server]\nlisten = \"[::1]:7000\"\n").unwrap();
        assert_eq!(config.listen_port(), Some(7000));
        assert_eq!(config.tunnel_config().local_port, 7000);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PORTAL_API_KEY", "secret"),
            ("PORTAL_LISTEN", "0.0.0.0:1234"),
            ("PORTAL_TUNNEL_NAME", "edge"),
            ("PORTAL_TUNNEL_TOKEN", "tok"),
            ("PORTAL_TUNNEL_AUTO_START", "TRUE"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_env(|k| env.get(k).map(ToString::to_string));

        assert_eq!(config.auth.api_key, "secret");
        assert_eq!(config.server.listen, "0.0.0.0:1234");
        assert!(config.tunnel.auto_start);
        let tunnel = config.tunnel_config();
        assert_eq!(tunnel.local_port, 1234);
        assert_eq!(tunnel.tunnel_name.as_deref(), Some("edge"));
        assert_eq!(tunnel.auth_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_load_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            Config::load(missing.to_str()),
            Err(ConfigError::Read { .. })
        ));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[tunnel]\nstart_timeout_secs = \"soon\"\n").unwrap();
        assert!(matches!(
            Config::load(bad.to_str()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
