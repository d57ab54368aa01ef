//! Directory error types

use thiserror::Error;

/// LDAP result code for `noSuchObject`
pub const NO_SUCH_OBJECT: u32 = 32;

/// LDAP result code for `entryAlreadyExists`
pub const ENTRY_ALREADY_EXISTS: u32 = 68;

/// Failures reported by a single connection to a single endpoint
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Socket error, timeout, bind failure or anything else that means
    /// this endpoint cannot serve the request right now
    #[error("transport failure: {0}")]
    Transport(String),

    /// The endpoint refused a write because it is (currently) read-only
    #[error("endpoint is read-only: {0}")]
    ReadOnly(String),

    /// The endpoint processed the operation and refused it
    #[error("operation rejected (code {code}): {message}")]
    Rejected { code: u32, message: String },
}

/// Directory operation errors surfaced to callers
///
/// Not-found, read-only and unavailable are expected conditions: callers are
/// meant to match on them, not to propagate them as bugs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// No user record matches the given name
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// No device record matches the given MAC address
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Every endpoint in the pool has been tried and none answered
    #[error("Directory unavailable: all endpoints exhausted")]
    Unavailable,

    /// A write was attempted while no writable endpoint is reachable
    #[error("Directory is read-only")]
    ReadOnly,

    /// The endpoint refused the operation itself
    #[error("Directory rejected operation (code {code}): {message}")]
    Rejected { code: u32, message: String },

    /// A record exists but cannot be mapped to its typed model
    #[error("Invalid directory entry {dn}: {reason}")]
    InvalidEntry { dn: String, reason: String },

    /// Invalid pool or schema configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DirectoryError {
    /// True for the `NotFound` family (users and devices)
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DirectoryError::UserNotFound(_) | DirectoryError::DeviceNotFound(_)
        )
    }

    pub(crate) fn invalid_entry(dn: &str, reason: impl Into<String>) -> Self {
        DirectoryError::InvalidEntry {
            dn: dn.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for directory operations
pub type DirectoryResult<T> = Result<T, DirectoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_family() {
        assert!(DirectoryError::UserNotFound("alice".into()).is_not_found());
        assert!(DirectoryError::DeviceNotFound("aabbccddeeff".into()).is_not_found());
        assert!(!DirectoryError::Unavailable.is_not_found());
        assert!(!DirectoryError::ReadOnly.is_not_found());
    }
}
