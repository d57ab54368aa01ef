//! Authentication, authorization and post-auth decisions
//!
//! Every decision is a function of the directory contents at call time.
//! Directory failures never escape: each one is mapped to an outcome the NAS
//! understands, so a directory outage shows up as a short-lived rejection
//! rather than a transport error.
//!
//! Credential-mode authentication registers a device the first time it is
//! seen with a given user. Registration is attempted at most once per
//! request; a device that still cannot be read back is reported as
//! unregistered.

mod authorization;
mod outcome;
mod post_auth;

pub use outcome::{
    AuthOutcome, Decision, EXPIRED_SESSION_TIMEOUT, FAILURE_SESSION_TIMEOUT, MAX_SESSION_TIMEOUT,
    Reply,
};
pub use post_auth::{PostAuthDecision, PostAuthOutcome};

use crate::request::{AccessRequest, AuthMode};
use chrono::{DateTime, Utc};
use nac_directory::{Device, DirectoryError, DirectoryResult, DirectorySchema, User};
use tracing::{debug, error, info, warn};

/// Where the VLAN of a successful decision comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VlanAssignment {
    /// Decided by the caller (e.g. from the NAS address)
    Fixed(u16),
    /// Looked up from the device owner's room
    OwnerRoom,
}

/// Decision engine over the typed directory
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    schema: DirectorySchema,
    quarantine_vlan: u16,
}

impl DecisionEngine {
    pub fn new(schema: DirectorySchema, quarantine_vlan: u16) -> Self {
        DecisionEngine {
            schema,
            quarantine_vlan,
        }
    }

    pub fn schema(&self) -> &DirectorySchema {
        &self.schema
    }

    pub fn quarantine_vlan(&self) -> u16 {
        self.quarantine_vlan
    }

    /// Authenticate a request, dispatching on its mode
    pub async fn authenticate(&self, request: &AccessRequest, vlan: VlanAssignment) -> Decision {
        self.authenticate_at(request, vlan, Utc::now()).await
    }

    pub async fn authenticate_at(
        &self,
        request: &AccessRequest,
        vlan: VlanAssignment,
        now: DateTime<Utc>,
    ) -> Decision {
        match request.mode() {
            AuthMode::Mac => {
                debug!(uid = %request.identity, "MAC authentication");
                self.authenticate_mac(request, vlan, now).await
            }
            AuthMode::Dot1x => {
                debug!(uid = %request.identity, "802.1X authentication");
                self.authenticate_dot1x(request, vlan, now).await
            }
        }
    }

    /// MAC authentication: the identity must be the device's own address
    pub async fn authenticate_mac(
        &self,
        request: &AccessRequest,
        vlan: VlanAssignment,
        now: DateTime<Utc>,
    ) -> Decision {
        let mode = AuthMode::Mac;
        if request.identity != request.mac {
            warn!(uid = %request.identity, mac = %request.mac, "MAC auth failed: inconsistent MAC");
            return Decision::new(mode, AuthOutcome::InconsistentIdentity, now);
        }

        let device = match self.schema.get_device(&request.mac).await {
            Ok(device) => device,
            Err(e) => return self.failure(mode, request, &e, now),
        };

        if !device.is_mac_auth() {
            warn!(uid = %request.identity, mac = %request.mac, "MAC auth failed: wrong auth type");
            return Decision::new(mode, AuthOutcome::WrongAuthType, now).with_device(device);
        }

        self.grant(mode, request, device, vlan, now).await
    }

    /// Credential authentication, registering the device on first sight
    pub async fn authenticate_dot1x(
        &self,
        request: &AccessRequest,
        vlan: VlanAssignment,
        now: DateTime<Utc>,
    ) -> Decision {
        let mode = AuthMode::Dot1x;
        let user = match self.schema.get_user(&request.identity).await {
            Ok(user) => user,
            Err(e) => return self.failure(mode, request, &e, now),
        };

        let device = match self.device_or_register(&request.mac, &user).await {
            Ok(device) => device,
            Err(e) => return self.failure(mode, request, &e, now),
        };

        if let Some(rejection) = check_dot1x_device(request, &user, &device) {
            return Decision::new(mode, rejection, now).with_device(device);
        }

        self.grant(mode, request, device, vlan, now).await
    }

    /// Load a device, registering it for `user` if it does not exist yet
    ///
    /// The device is read back once after registration; if it is still
    /// missing the lookup error is returned as is.
    async fn device_or_register(&self, mac: &str, user: &User) -> DirectoryResult<Device> {
        match self.schema.get_device(mac).await {
            Err(DirectoryError::DeviceNotFound(_)) => {
                debug!(uid = %user.name, mac = %mac, "Unregistered device, registering");
                self.schema.register_device(mac, user).await?;
                self.schema.get_device(mac).await
            }
            other => other,
        }
    }

    /// Subscription check shared by every successful path
    async fn grant(
        &self,
        mode: AuthMode,
        request: &AccessRequest,
        device: Device,
        vlan: VlanAssignment,
        now: DateTime<Utc>,
    ) -> Decision {
        if !device.owner.has_subscription_at(now) {
            warn!(
                uid = %request.identity,
                mac = %request.mac,
                auth = mode.as_str(),
                "Authenticated, but subscription ended"
            );
            return Decision::new(mode, AuthOutcome::SubscriptionExpired, now)
                .with_device(device)
                .with_vlan(self.quarantine_vlan);
        }

        let vlan = match vlan {
            VlanAssignment::Fixed(vlan) => vlan,
            VlanAssignment::OwnerRoom => match self.schema.get_vlan(&device.owner.room_name).await {
                Ok(vlan) => vlan,
                Err(e) => {
                    let decision = self.failure(mode, request, &e, now);
                    return decision.with_device(device);
                }
            },
        };

        info!(
            uid = %request.identity,
            mac = %request.mac,
            auth = mode.as_str(),
            vlan,
            "Authentication done"
        );
        Decision::new(mode, AuthOutcome::Ok, now)
            .with_device(device)
            .with_vlan(vlan)
    }

    fn failure(
        &self,
        mode: AuthMode,
        request: &AccessRequest,
        error: &DirectoryError,
        now: DateTime<Utc>,
    ) -> Decision {
        let outcome = match error {
            DirectoryError::UserNotFound(_) => {
                warn!(uid = %request.identity, auth = mode.as_str(), "Auth failed: unknown user");
                AuthOutcome::UnknownUser
            }
            DirectoryError::DeviceNotFound(_) => {
                warn!(mac = %request.mac, auth = mode.as_str(), "Auth failed: unregistered device");
                AuthOutcome::UnregisteredDevice
            }
            other => {
                error!(
                    uid = %request.identity,
                    mac = %request.mac,
                    auth = mode.as_str(),
                    error = %other,
                    "Auth failed: directory error"
                );
                AuthOutcome::DirectoryError
            }
        };
        Decision::new(mode, outcome, now)
    }

    /// Best-effort last-seen update; failures are logged and ignored
    pub async fn record_seen(&self, device: &Device, now: DateTime<Utc>) {
        if let Err(e) = self.schema.touch_last_seen(device, now).await {
            debug!(mac = %device.mac_address, error = %e, "Could not update last seen time");
        }
    }
}

/// Ownership and auth type checks for a credential-mode device
fn check_dot1x_device(request: &AccessRequest, user: &User, device: &Device) -> Option<AuthOutcome> {
    if !device.is_owned_by(user) {
        warn!(
            uid = %request.identity,
            mac = %request.mac,
            owner = %device.owner.name,
            "802.1X auth failed: wrong device owner"
        );
        return Some(AuthOutcome::WrongOwner);
    }
    if !device.is_dot1x_auth() {
        warn!(uid = %request.identity, mac = %request.mac, "802.1X auth failed: wrong auth type");
        return Some(AuthOutcome::WrongAuthType);
    }
    None
}
