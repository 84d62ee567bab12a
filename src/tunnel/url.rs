//! Public URL detection in `cloudflared` output.
//!
//! `cloudflared` has no machine-readable startup handshake, so the public
//! hostname is scraped from its log lines. The pattern list below is the
//! compatibility contract with the client's output format.

use std::sync::LazyLock;

use regex::Regex;

/// Hostname-suffix patterns, tried in order.
static HOST_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"https://[a-zA-Z0-9-]+(?:\.[a-zA-Z0-9-]+)*\.trycloudflare\.com",
        r"https://[a-zA-Z0-9-]+(?:\.[a-zA-Z0-9-]+)*\.cloudflaretunnel\.com",
        r"https://[a-zA-Z0-9-]+(?:\.[a-zA-Z0-9-]+)*\.cfargotunnel\.com",
        r"https://[a-zA-Z0-9-]+(?:\.[a-zA-Z0-9-]+)*\.tunnel\.cloudflare\.com",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Catch-all for "tunnel ... started ... https://..." phrasing.
static STARTED_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?i)tunnel.*started.*?(https://[^\s"'|<>]+)"#).ok()
});

/// Control-plane hosts that show up in error lines and are never a tunnel URL.
const IGNORED_HOSTS: &[&str] = &["https://api.trycloudflare.com"];

/// Extract the public tunnel URL from one line of output, if present.
pub fn extract_url(line: &str) -> Option<String> {
    for re in HOST_PATTERNS.iter() {
        let found = re
            .find_iter(line)
            .map(|m| m.as_str())
            .find(|url| !IGNORED_HOSTS.contains(url));
        if let Some(url) = found {
            return Some(url.to_string());
        }
    }
    let re = STARTED_PATTERN.as_ref()?;
    let url = re.captures(line)?.get(1)?.as_str();
    let url = url.trim_end_matches(['.', ',', ')']);
    (!IGNORED_HOSTS.contains(&url)).then(|| url.to_string())
}
