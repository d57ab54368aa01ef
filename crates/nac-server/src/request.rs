//! Request field normalization and mode dispatch

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// A bare, lower-case MAC address
static MAC_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{12}$").expect("valid MAC pattern"));

/// Authentication mode of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthMode {
    /// The identity is the device's MAC address
    #[serde(rename = "MAC")]
    Mac,
    /// The identity is a user account
    #[serde(rename = "802.1X")]
    Dot1x,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Mac => "MAC",
            AuthMode::Dot1x => "802.1X",
        }
    }
}

/// Strip dashes from a MAC address and lower-case it
pub fn normalize_mac(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '-')
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Drop any `@realm` suffix, lower-case and trim
pub fn normalize_identity(raw: &str) -> String {
    raw.split('@')
        .next()
        .unwrap_or_default()
        .to_lowercase()
        .trim()
        .to_string()
}

/// Whether a normalized identity looks like a MAC address
pub fn is_mac_identity(identity: &str) -> bool {
    MAC_PATTERN.is_match(identity)
}

/// The identity pair every decision works on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    /// Normalized client MAC
    pub mac: String,
    /// Normalized claimed identity
    pub identity: String,
}

impl AccessRequest {
    /// Normalize raw transport fields
    pub fn new(client_mac: &str, uid: &str) -> Self {
        AccessRequest {
            mac: normalize_mac(client_mac),
            identity: normalize_identity(uid),
        }
    }

    pub fn mode(&self) -> AuthMode {
        if is_mac_identity(&self.identity) {
            AuthMode::Mac
        } else {
            AuthMode::Dot1x
        }
    }
}
