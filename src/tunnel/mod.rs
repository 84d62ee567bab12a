//! Managed `cloudflared` tunnel for the local server.
//!
//! Three layers, each usable on its own:
//!
//! - [`BinaryResolver`] finds or downloads a runnable `cloudflared`.
//! - [`TunnelProcess`] runs one client process and scrapes its public URL.
//! - [`TunnelOrchestrator`] keeps at most one tunnel alive, tracks its
//!   status and notifies listeners on every transition.

pub mod error;
pub mod orchestrator;
pub mod platform;
pub mod process;
pub mod resolver;
pub mod types;
pub mod url;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{OrchestratorError, ProcessError, ResolutionError, TunnelError};
pub use orchestrator::{OrchestratorOptions, StatusListener, TunnelOrchestrator};
pub use platform::Platform;
pub use process::{build_args, CommandLauncher, Launch, TunnelProcess};
pub use resolver::{BinaryResolver, Fetch, HttpFetcher, Probe, ResolverOptions, VersionProbe};
pub use types::{
    BinarySource, ResolvedBinary, TunnelConfig, TunnelMode, TunnelState, TunnelStatus,
};
pub use url::extract_url;
