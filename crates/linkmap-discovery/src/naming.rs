//! Canonical device names from neighbor host names

use regex::Regex;
use std::sync::LazyLock;

pub use linkmap_core::interface_type;

/// Leading word-and-hyphen run: `n77-1.cisco.com` yields `n77-1`
static HOSTNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*?(?P<hostname>[-\w]+)\s?").expect("valid hostname pattern"));

/// Strip the domain and any vendor decoration from a neighbor host name
///
/// Returns the input unchanged when it contains no word characters.
pub fn normalize(raw: &str) -> String {
    HOSTNAME
        .captures(raw)
        .and_then(|caps| caps.name("hostname"))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| raw.to_string())
}
