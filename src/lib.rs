#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

//! portal library: the tunnel lifecycle subsystem and its HTTP surface.
//!
//! - `tunnel`: binary resolution, process supervision, orchestration
//! - `auth`: API key authentication middleware
//! - `config`: configuration loading
//! - `routes`: REST and SSE route handlers
//! - `state`: shared handler state

pub mod auth;
pub mod config;
pub mod routes;
pub mod state;
pub mod tunnel;
pub mod util;

pub use auth::ApiKey;
pub use config::Config;
pub use state::AppState;
pub use tunnel::{BinaryResolver, TunnelOrchestrator, TunnelProcess};
