//! Small helpers shared across modules.

use std::path::PathBuf;

/// Expand a leading `~` to the user's home directory.
///
/// - `"~"` → `"/home/user"`
/// - `"~/bin/cloudflared"` → `"/home/user/bin/cloudflared"`
/// - Anything else passes through unchanged.
pub fn expand_tilde(path: &str) -> PathBuf {
    let rest = match path {
        "~" => Some(""),
        p => p.strip_prefix("~/"),
    };
    match (rest, dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
