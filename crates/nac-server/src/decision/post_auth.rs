use super::DecisionEngine;
use crate::request::{AccessRequest, AuthMode};
use chrono::{DateTime, Utc};
use nac_directory::{Device, DirectoryError};
use tracing::{error, info, warn};

/// Outcome of a post-auth call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PostAuthOutcome {
    Ok,
    InconsistentIdentity,
    UnknownUser,
    UnregisteredDevice,
    DirectoryError,
}

impl PostAuthOutcome {
    pub fn code(&self) -> &'static str {
        match self {
            PostAuthOutcome::Ok => "OK",
            PostAuthOutcome::InconsistentIdentity => "INCONSISTENT_MAC",
            PostAuthOutcome::UnknownUser => "UNKNOWN_USER",
            PostAuthOutcome::UnregisteredDevice => "UNREGISTERED_MACHINE",
            PostAuthOutcome::DirectoryError => "LDAP_ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostAuthDecision {
    pub mode: AuthMode,
    pub outcome: PostAuthOutcome,
    pub device: Option<Device>,
}

impl PostAuthDecision {
    pub fn new(mode: AuthMode, outcome: PostAuthOutcome) -> Self {
        PostAuthDecision {
            mode,
            outcome,
            device: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == PostAuthOutcome::Ok
    }

    pub fn owner_name(&self) -> &str {
        self.device
            .as_ref()
            .map(|d| d.owner.name.as_str())
            .unwrap_or("UNKNOWN")
    }
}

fn failure(mode: AuthMode, request: &AccessRequest, error: &DirectoryError) -> PostAuthDecision {
    let outcome = match error {
        DirectoryError::UserNotFound(_) => {
            warn!(uid = %request.identity, "Post-auth failed: unknown user");
            PostAuthOutcome::UnknownUser
        }
        DirectoryError::DeviceNotFound(_) => {
            error!(mac = %request.mac, "Post-auth failed: unregistered device");
            PostAuthOutcome::UnregisteredDevice
        }
        other => {
            error!(
                uid = %request.identity,
                mac = %request.mac,
                error = %other,
                "Post-auth failed: directory error"
            );
            PostAuthOutcome::DirectoryError
        }
    };
    PostAuthDecision::new(mode, outcome)
}

impl DecisionEngine {
    /// Update last-seen and register credential-mode devices
    pub async fn post_auth(&self, request: &AccessRequest) -> PostAuthDecision {
        self.post_auth_at(request, Utc::now()).await
    }

    pub async fn post_auth_at(&self, request: &AccessRequest, now: DateTime<Utc>) -> PostAuthDecision {
        let mode = request.mode();
        let device = match mode {
            AuthMode::Mac => {
                if request.identity != request.mac {
                    warn!(mac = %request.mac, uid = %request.identity, "Post-auth failed: inconsistent MAC");
                    return PostAuthDecision::new(mode, PostAuthOutcome::InconsistentIdentity);
                }
                self.schema.get_device(&request.mac).await
            }
            AuthMode::Dot1x => match self.schema.get_user(&request.identity).await {
                Ok(user) => self.device_or_register(&request.mac, &user).await,
                Err(e) => Err(e),
            },
        };

        let device = match device {
            Ok(device) => device,
            Err(e) => return failure(mode, request, &e),
        };

        self.record_seen(&device, now).await;
        info!(uid = %request.identity, mac = %request.mac, auth = mode.as_str(), "Post-auth done");
        PostAuthDecision {
            mode,
            outcome: PostAuthOutcome::Ok,
            device: Some(device),
        }
    }
}
