//! Decision results and their reply payload

use crate::request::AuthMode;
use chrono::{DateTime, Utc};
use nac_directory::Device;
use serde::Serialize;
use std::fmt::Write;

/// Longest session granted, in seconds
pub const MAX_SESSION_TIMEOUT: i64 = 43200;

/// Session timeout for an ended subscription
pub const EXPIRED_SESSION_TIMEOUT: i64 = 3600;

/// Session timeout for every failure; short so the NAS retries soon
pub const FAILURE_SESSION_TIMEOUT: i64 = 300;

/// Outcome of an authentication or authorization decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthOutcome {
    Ok,
    SubscriptionExpired,
    UnknownUser,
    WrongAuthType,
    UnregisteredDevice,
    InconsistentIdentity,
    WrongOwner,
    DirectoryError,
}

impl AuthOutcome {
    /// Stable outcome name, as written to the audit log
    pub fn code(&self) -> &'static str {
        match self {
            AuthOutcome::Ok => "AUTH_OK",
            AuthOutcome::SubscriptionExpired => "SUBSCRIPTION_ENDED",
            AuthOutcome::UnknownUser => "UNKNOWN_USER",
            AuthOutcome::WrongAuthType => "WRONG_AUTH_TYPE",
            AuthOutcome::UnregisteredDevice => "UNREGISTERED_DEVICE",
            AuthOutcome::InconsistentIdentity => "INCONSISTENT_MAC",
            AuthOutcome::WrongOwner => "WRONG_MACHINE_OWNER",
            AuthOutcome::DirectoryError => "LDAP_ERROR",
        }
    }

    /// Human-readable message returned to the NAS
    pub fn message(&self) -> &'static str {
        match self {
            AuthOutcome::Ok => "Authentication successful",
            AuthOutcome::SubscriptionExpired => "Your subscription has ended",
            AuthOutcome::UnknownUser => "Unknown user",
            AuthOutcome::WrongAuthType => "This device is not allowed to use this authentication method",
            AuthOutcome::UnregisteredDevice => "This device is not registered",
            AuthOutcome::InconsistentIdentity => "The identity does not match the device MAC address",
            AuthOutcome::WrongOwner => "This device belongs to another user",
            AuthOutcome::DirectoryError => "Directory temporarily unavailable, please retry",
        }
    }

    /// `Ok` and `SubscriptionExpired` let the client on the network
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthOutcome::Ok | AuthOutcome::SubscriptionExpired)
    }
}

/// A decision, built once per request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub mode: AuthMode,
    pub outcome: AuthOutcome,
    pub device: Option<Device>,
    pub vlan: Option<u16>,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    pub fn new(mode: AuthMode, outcome: AuthOutcome, decided_at: DateTime<Utc>) -> Self {
        Decision {
            mode,
            outcome,
            device: None,
            vlan: None,
            decided_at,
        }
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_vlan(mut self, vlan: u16) -> Self {
        self.vlan = Some(vlan);
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.outcome.is_authenticated()
    }

    /// Name of the device owner, or `UNKNOWN`
    pub fn owner_name(&self) -> &str {
        self.device
            .as_ref()
            .map(|d| d.owner.name.as_str())
            .unwrap_or("UNKNOWN")
    }

    /// Seconds before the NAS must re-authenticate the client
    pub fn session_timeout(&self) -> i64 {
        match (self.outcome, &self.device) {
            (AuthOutcome::Ok, Some(device)) => {
                let left = (device.owner.subscription_end - self.decided_at).num_seconds();
                MAX_SESSION_TIMEOUT.min(left + 1).max(1)
            }
            (AuthOutcome::SubscriptionExpired, _) => EXPIRED_SESSION_TIMEOUT,
            _ => FAILURE_SESSION_TIMEOUT,
        }
    }

    /// Reply attributes for the RADIUS server
    pub fn reply(&self) -> Reply {
        let mut reply = Reply {
            message: self.outcome.message().to_string(),
            session_timeout: self.session_timeout(),
            tunnel_private_group_id: None,
            cleartext_password: None,
            nt_password: None,
            password_with_header: None,
        };

        if !self.is_authenticated() {
            return reply;
        }
        let Some(ref device) = self.device else {
            return reply;
        };

        reply.tunnel_private_group_id = self.vlan.map(|vlan| vlan.to_string());
        match self.mode {
            AuthMode::Mac => reply.cleartext_password = Some(device.mac_address.clone()),
            AuthMode::Dot1x => {
                reply.nt_password = Some(hex_header(&device.owner.nt_password_hash));
                reply.password_with_header = Some(device.owner.password_hash.clone());
            }
        }
        reply
    }
}

/// `0x` followed by the hex of the value's bytes
fn hex_header(value: &str) -> String {
    let mut out = String::with_capacity(2 + value.len() * 2);
    out.push_str("0x");
    for byte in value.bytes() {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// JSON reply consumed by the RADIUS server's REST module
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    #[serde(rename = "Reply-Message")]
    pub message: String,

    #[serde(rename = "Session-Timeout")]
    pub session_timeout: i64,

    #[serde(rename = "Tunnel-Private-Group-Id", skip_serializing_if = "Option::is_none")]
    pub tunnel_private_group_id: Option<String>,

    #[serde(rename = "control:Cleartext-Password", skip_serializing_if = "Option::is_none")]
    pub cleartext_password: Option<String>,

    #[serde(rename = "control:NT-Password", skip_serializing_if = "Option::is_none")]
    pub nt_password: Option<String>,

    #[serde(rename = "control:Password-With-Header", skip_serializing_if = "Option::is_none")]
    pub password_with_header: Option<String>,
}
