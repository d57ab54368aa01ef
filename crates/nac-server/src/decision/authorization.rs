use super::{Decision, DecisionEngine, VlanAssignment, check_dot1x_device};
use crate::request::{AccessRequest, AuthMode};
use chrono::{DateTime, Utc};
use nac_directory::{AuthType, Device, DirectoryError};
use tracing::info;

impl DecisionEngine {
    /// Authorize a request; the VLAN always comes from the owner's room
    pub async fn authorize(&self, request: &AccessRequest) -> Decision {
        self.authorize_at(request, Utc::now()).await
    }

    pub async fn authorize_at(&self, request: &AccessRequest, now: DateTime<Utc>) -> Decision {
        match request.mode() {
            AuthMode::Mac => {
                self.authenticate_mac(request, VlanAssignment::OwnerRoom, now)
                    .await
            }
            AuthMode::Dot1x => self.authorize_dot1x(request, now).await,
        }
    }

    /// Credential authorization
    ///
    /// An unknown device is not registered here: it is treated as pending
    /// registration by the requesting user and post-auth creates it.
    async fn authorize_dot1x(&self, request: &AccessRequest, now: DateTime<Utc>) -> Decision {
        let mode = AuthMode::Dot1x;
        let user = match self.schema.get_user(&request.identity).await {
            Ok(user) => user,
            Err(e) => return self.failure(mode, request, &e, now),
        };

        let device = match self.schema.get_device(&request.mac).await {
            Ok(device) => {
                if let Some(rejection) = check_dot1x_device(request, &user, &device) {
                    return Decision::new(mode, rejection, now).with_device(device);
                }
                device
            }
            Err(DirectoryError::DeviceNotFound(_)) => {
                info!(uid = %request.identity, mac = %request.mac, "Device needs registration");
                Device {
                    mac_address: request.mac.clone(),
                    auth_type: AuthType::Dot1x,
                    owner: user,
                }
            }
            Err(e) => return self.failure(mode, request, &e, now),
        };

        self.grant(mode, request, device, VlanAssignment::OwnerRoom, now)
            .await
    }
}

