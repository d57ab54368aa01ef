//! Audit logging for authentication and accounting events
//!
//! Every decision and every accepted accounting event is written as one JSON
//! object per line. Decisions go to the audit log, accounting events to the
//! accounting log; either file is optional.

use crate::accounting::Deltas;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::error;

/// Audit event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// `/check` decision
    Authentication,
    /// `/authorize` decision
    Authorization,
    /// `/post-auth` result
    PostAuth,
    /// Rejected credentials reported by the RADIUS server
    WrongPassword,
    /// Accounting session start
    AccountingStart,
    /// Accounting interim update
    AccountingUpdate,
    /// Accounting session stop
    AccountingStop,
}

/// Audit log entry
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// Timestamp (Unix epoch microseconds)
    pub timestamp: i64,
    /// ISO 8601 formatted timestamp
    pub timestamp_iso: String,
    /// Event type
    pub event_type: AuditEventType,
    /// NAS address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nas_ip: Option<String>,
    /// NAS port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nas_port: Option<String>,
    /// Client MAC address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    /// Identity claimed by the client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Client IP address (accounting)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    /// Owner of the device, `UNKNOWN` when not resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Outcome code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    /// Authentication mode (`MAC` or `802.1X`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    /// Assigned VLAN
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vlan: Option<u16>,
    /// Accounting session id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    /// Traffic since the previous accounting event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deltas: Option<Deltas>,
    /// Accounting stop reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEntry {
    /// Create an entry stamped with the current time
    pub fn new(event_type: AuditEventType) -> Self {
        Self::at(event_type, Utc::now())
    }

    /// Create an entry for an event that happened at `time`
    pub fn at(event_type: AuditEventType, time: DateTime<Utc>) -> Self {
        AuditEntry {
            timestamp: time.timestamp_micros(),
            timestamp_iso: time.to_rfc3339_opts(SecondsFormat::Secs, true),
            event_type,
            nas_ip: None,
            nas_port: None,
            mac: None,
            uid: None,
            client_ip: None,
            owner: None,
            outcome: None,
            auth: None,
            vlan: None,
            session: None,
            deltas: None,
            reason: None,
        }
    }

    /// Set NAS address and port
    pub fn with_nas(mut self, ip: impl Into<String>, port: impl Into<String>) -> Self {
        self.nas_ip = Some(ip.into());
        self.nas_port = Some(port.into());
        self
    }

    /// Set client MAC and claimed identity
    pub fn with_client(mut self, mac: impl Into<String>, uid: impl Into<String>) -> Self {
        self.mac = Some(mac.into());
        self.uid = Some(uid.into());
        self
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Set outcome code and auth mode
    pub fn with_outcome(mut self, outcome: impl Into<String>, auth: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self.auth = Some(auth.into());
        self
    }

    pub fn with_vlan(mut self, vlan: Option<u16>) -> Self {
        self.vlan = vlan;
        self
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn with_deltas(mut self, deltas: Deltas) -> Self {
        self.deltas = Some(deltas);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Audit logger
pub struct AuditLogger {
    /// File path for audit log
    file_path: Option<String>,
    /// File handle (wrapped in Arc<Mutex> for thread safety)
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl AuditLogger {
    /// Create a new audit logger; `None` disables it
    pub fn new(file_path: Option<String>) -> std::io::Result<Self> {
        let file = if let Some(ref path) = file_path {
            let f = OpenOptions::new().create(true).append(true).open(path)?;
            Some(Arc::new(Mutex::new(f)))
        } else {
            None
        };

        Ok(AuditLogger { file_path, file })
    }

    /// A logger that drops every entry
    pub fn disabled() -> Self {
        AuditLogger {
            file_path: None,
            file: None,
        }
    }

    /// Log an audit entry
    pub async fn log(&self, entry: AuditEntry) {
        if let Some(ref file) = self.file {
            match serde_json::to_string(&entry) {
                Ok(json) => {
                    let mut f = file.lock().await;
                    if let Err(e) = writeln!(f, "{}", json) {
                        error!("Failed to write audit log: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to serialize audit entry: {}", e);
                }
            }
        }
    }

    /// Check if audit logging is enabled
    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    /// Get the audit log file path
    pub fn file_path(&self) -> Option<&str> {
        self.file_path.as_deref()
    }
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("file_path", &self.file_path)
            .finish()
    }
}
