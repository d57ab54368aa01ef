//! Typed accessors over the directory
//!
//! [`SchemaLayout`] says where the four record kinds live and how their
//! attributes are named; [`DirectorySchema`] maps raw entries to [`User`] and
//! [`Device`] values. Nothing above this module sees a raw entry.

use crate::client::DirectoryClient;
use crate::connection::{DirectoryEntry, Query};
use crate::error::{DirectoryError, DirectoryResult, ENTRY_ALREADY_EXISTS};
use crate::models::{AuthType, Device, User, format_generalized_time, parse_generalized_time};
use chrono::{DateTime, Utc};
use ldap3::dn_escape;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

/// Allowed user names; anything else never reaches the directory
static USER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]{0,63}$").expect("valid user name pattern"));

/// Directory layout: base DNs, object classes and attribute names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaLayout {
    pub people_dn: String,
    pub devices_dn: String,
    pub rooms_dn: String,
    pub zones_dn: String,

    pub device_class: String,
    pub room_class: String,
    pub zone_class: String,

    pub user_id_attr: String,
    pub password_attr: String,
    pub nt_password_attr: String,
    pub subscription_end_attr: String,
    pub building_attr: String,
    pub room_number_attr: String,

    pub mac_attr: String,
    pub auth_type_attr: String,
    pub owner_attr: String,
    pub last_seen_attr: String,

    pub room_name_attr: String,
    pub zone_id_attr: String,
    pub vlan_offset_attr: String,

    /// Base of every room VLAN, and the VLAN of unmapped rooms
    pub default_vlan: u16,
}

impl Default for SchemaLayout {
    fn default() -> Self {
        SchemaLayout {
            people_dn: "ou=people,dc=example,dc=org".to_string(),
            devices_dn: "ou=devices,dc=example,dc=org".to_string(),
            rooms_dn: "ou=vlans,dc=example,dc=org".to_string(),
            zones_dn: "ou=zones,dc=example,dc=org".to_string(),
            device_class: "reselDevice".to_string(),
            room_class: "reselVLAN".to_string(),
            zone_class: "reselZone".to_string(),
            user_id_attr: "uid".to_string(),
            password_attr: "userPassword".to_string(),
            nt_password_attr: "ntPassword".to_string(),
            subscription_end_attr: "endInternet".to_string(),
            building_attr: "batiment".to_string(),
            room_number_attr: "roomNumber".to_string(),
            mac_attr: "macAddress".to_string(),
            auth_type_attr: "authType".to_string(),
            owner_attr: "uidProprio".to_string(),
            last_seen_attr: "lastDate".to_string(),
            room_name_attr: "roomName".to_string(),
            zone_id_attr: "zoneID".to_string(),
            vlan_offset_attr: "vlanOffset".to_string(),
            default_vlan: 1000,
        }
    }
}

impl SchemaLayout {
    /// Validate configuration
    pub fn validate(&self) -> DirectoryResult<()> {
        for (name, dn) in [
            ("people_dn", &self.people_dn),
            ("devices_dn", &self.devices_dn),
            ("rooms_dn", &self.rooms_dn),
            ("zones_dn", &self.zones_dn),
        ] {
            if dn.trim().is_empty() {
                return Err(DirectoryError::Configuration(format!("{} cannot be empty", name)));
            }
        }
        if self.default_vlan == 0 || self.default_vlan > 4094 {
            return Err(DirectoryError::Configuration(format!(
                "Invalid default VLAN {}",
                self.default_vlan
            )));
        }
        Ok(())
    }

    pub fn user_dn(&self, name: &str) -> String {
        format!("{}={},{}", self.user_id_attr, dn_escape(name), self.people_dn)
    }

    pub fn device_dn(&self, mac: &str) -> String {
        format!("{}={},{}", self.mac_attr, dn_escape(mac), self.devices_dn)
    }

    /// Directory entry for a user; `room_name` is split back into building
    /// and room number
    pub fn user_entry(&self, user: &User) -> DirectoryEntry {
        let (building, room) = user.room_name.rsplit_once('-').unwrap_or((user.room_name.as_str(), "0"));
        DirectoryEntry::new(self.user_dn(&user.name))
            .with("objectClass", "person")
            .with(&self.user_id_attr, &user.name)
            .with(&self.password_attr, &user.password_hash)
            .with(&self.nt_password_attr, &user.nt_password_hash)
            .with(
                &self.subscription_end_attr,
                format_generalized_time(user.subscription_end),
            )
            .with(&self.building_attr, building)
            .with(&self.room_number_attr, room)
    }

    pub fn device_entry(&self, mac: &str, auth_type: AuthType, owner: &str) -> DirectoryEntry {
        DirectoryEntry::new(self.device_dn(mac))
            .with("objectClass", &self.device_class)
            .with(&self.mac_attr, mac)
            .with(&self.auth_type_attr, auth_type.as_str())
            .with(&self.owner_attr, self.user_dn(owner))
    }

    pub fn room_entry(&self, room_name: &str, zone_id: &str, vlan_offset: u16) -> DirectoryEntry {
        DirectoryEntry::new(format!(
            "{}={},{}",
            self.room_name_attr,
            dn_escape(room_name),
            self.rooms_dn
        ))
        .with("objectClass", &self.room_class)
        .with(&self.room_name_attr, room_name)
        .with(&self.zone_id_attr, zone_id)
        .with(&self.vlan_offset_attr, vlan_offset.to_string())
    }

    pub fn zone_entry(&self, zone_id: &str, vlan_offset: u16) -> DirectoryEntry {
        DirectoryEntry::new(format!(
            "{}={},{}",
            self.zone_id_attr,
            dn_escape(zone_id),
            self.zones_dn
        ))
        .with("objectClass", &self.zone_class)
        .with(&self.zone_id_attr, zone_id)
        .with(&self.vlan_offset_attr, vlan_offset.to_string())
    }
}

/// Value of the first RDN of a DN (`uid=alice,ou=people,...` gives `alice`)
pub fn first_rdn_value(dn: &str) -> Option<&str> {
    dn.split(',')
        .next()
        .and_then(|rdn| rdn.split_once('='))
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// Typed access to users, devices and VLAN mappings
#[derive(Debug, Clone)]
pub struct DirectorySchema {
    client: Arc<DirectoryClient>,
    layout: SchemaLayout,
}

impl DirectorySchema {
    pub fn new(client: Arc<DirectoryClient>, layout: SchemaLayout) -> Self {
        DirectorySchema { client, layout }
    }

    pub fn client(&self) -> &Arc<DirectoryClient> {
        &self.client
    }

    pub fn layout(&self) -> &SchemaLayout {
        &self.layout
    }

    /// Fetch a user by name
    pub async fn get_user(&self, name: &str) -> DirectoryResult<User> {
        if !USER_NAME.is_match(name) {
            debug!(uid = %name, "Rejecting malformed user name");
            return Err(DirectoryError::UserNotFound(name.to_string()));
        }

        let layout = &self.layout;
        let query = Query::new(&layout.people_dn, &layout.user_id_attr, name);
        let attributes = [
            layout.user_id_attr.as_str(),
            layout.password_attr.as_str(),
            layout.nt_password_attr.as_str(),
            layout.subscription_end_attr.as_str(),
            layout.building_attr.as_str(),
            layout.room_number_attr.as_str(),
        ];

        match self.client.find(&query, &attributes).await? {
            Some(entry) => self.map_user(&entry),
            None => Err(DirectoryError::UserNotFound(name.to_string())),
        }
    }

    fn map_user(&self, entry: &DirectoryEntry) -> DirectoryResult<User> {
        let layout = &self.layout;
        let name = entry
            .first(&layout.user_id_attr)
            .ok_or_else(|| DirectoryError::invalid_entry(&entry.dn, "missing user id"))?;
        let end = entry
            .first(&layout.subscription_end_attr)
            .ok_or_else(|| DirectoryError::invalid_entry(&entry.dn, "missing subscription end"))?;
        let subscription_end = parse_generalized_time(end).ok_or_else(|| {
            DirectoryError::invalid_entry(&entry.dn, format!("bad subscription end '{}'", end))
        })?;

        let room_name = match (
            entry.first(&layout.building_attr),
            entry.first(&layout.room_number_attr),
        ) {
            (Some(building), Some(room)) => format!("{}-{:0>3}", building, room),
            _ => String::new(),
        };

        Ok(User {
            name: name.to_string(),
            password_hash: entry.first(&layout.password_attr).unwrap_or_default().to_string(),
            nt_password_hash: entry.first(&layout.nt_password_attr).unwrap_or_default().to_string(),
            subscription_end,
            room_name,
        })
    }

    /// Fetch a device by MAC address, resolving its owner
    pub async fn get_device(&self, mac: &str) -> DirectoryResult<Device> {
        let layout = &self.layout;
        let query = Query::new(&layout.devices_dn, &layout.mac_attr, mac)
            .with_object_class(&layout.device_class);
        let attributes = [
            layout.mac_attr.as_str(),
            layout.auth_type_attr.as_str(),
            layout.owner_attr.as_str(),
        ];

        let Some(entry) = self.client.find(&query, &attributes).await? else {
            return Err(DirectoryError::DeviceNotFound(mac.to_string()));
        };

        let auth_type = entry
            .first(&layout.auth_type_attr)
            .ok_or_else(|| DirectoryError::invalid_entry(&entry.dn, "missing auth type"))?
            .parse::<AuthType>()
            .map_err(|reason| DirectoryError::invalid_entry(&entry.dn, reason))?;
        let owner = entry
            .first(&layout.owner_attr)
            .and_then(first_rdn_value)
            .ok_or_else(|| DirectoryError::invalid_entry(&entry.dn, "missing or malformed owner"))?;

        let owner = self.get_user(owner).await?;
        Ok(Device {
            mac_address: entry
                .first(&layout.mac_attr)
                .unwrap_or(mac)
                .to_ascii_lowercase(),
            auth_type,
            owner,
        })
    }

    /// VLAN of a room: default base plus room and zone offsets
    ///
    /// Unknown rooms and zones fall back to the default VLAN.
    pub async fn get_vlan(&self, room_name: &str) -> DirectoryResult<u16> {
        let layout = &self.layout;
        if room_name.is_empty() {
            return Ok(layout.default_vlan);
        }

        let query = Query::new(&layout.rooms_dn, &layout.room_name_attr, room_name)
            .with_object_class(&layout.room_class);
        let attributes = [layout.vlan_offset_attr.as_str(), layout.zone_id_attr.as_str()];
        let Some(room) = self.client.find(&query, &attributes).await? else {
            debug!(room = %room_name, "Room has no VLAN mapping");
            return Ok(layout.default_vlan);
        };

        let Some(zone_id) = room.first(&layout.zone_id_attr) else {
            return Ok(layout.default_vlan);
        };
        let query = Query::new(&layout.zones_dn, &layout.zone_id_attr, zone_id)
            .with_object_class(&layout.zone_class);
        let Some(zone) = self
            .client
            .find(&query, &[layout.vlan_offset_attr.as_str()])
            .await?
        else {
            debug!(room = %room_name, zone = %zone_id, "Zone has no VLAN mapping");
            return Ok(layout.default_vlan);
        };

        let room_offset = self.vlan_offset(&room)?;
        let zone_offset = self.vlan_offset(&zone)?;
        layout
            .default_vlan
            .checked_add(room_offset)
            .and_then(|vlan| vlan.checked_add(zone_offset))
            .filter(|vlan| *vlan <= 4094)
            .ok_or_else(|| DirectoryError::invalid_entry(&room.dn, "VLAN offset out of range"))
    }

    fn vlan_offset(&self, entry: &DirectoryEntry) -> DirectoryResult<u16> {
        let raw = entry
            .first(&self.layout.vlan_offset_attr)
            .ok_or_else(|| DirectoryError::invalid_entry(&entry.dn, "missing VLAN offset"))?;
        raw.trim()
            .parse()
            .map_err(|_| DirectoryError::invalid_entry(&entry.dn, format!("bad VLAN offset '{}'", raw)))
    }

    /// Create a credential-authenticated device owned by `owner`
    ///
    /// A device created concurrently by another request counts as success.
    pub async fn register_device(&self, mac: &str, owner: &User) -> DirectoryResult<()> {
        info!(mac = %mac, uid = %owner.name, "Registering device");
        let entry = self.layout.device_entry(mac, AuthType::Dot1x, &owner.name);

        match self.client.add(&entry).await {
            Err(DirectoryError::Rejected { code, .. }) if code == ENTRY_ALREADY_EXISTS => {
                warn!(mac = %mac, "Device already registered");
                Ok(())
            }
            other => other,
        }
    }

    /// Record the time a device was last seen
    pub async fn touch_last_seen(&self, device: &Device, now: DateTime<Utc>) -> DirectoryResult<()> {
        self.client
            .modify(
                &self.layout.device_dn(&device.mac_address),
                &self.layout.last_seen_attr,
                &format_generalized_time(now),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_user_name_pattern() {
        for name in ["alice", "j.doe", "user_1", "a-b", "0day"] {
            assert!(USER_NAME.is_match(name), "{}", name);
        }
        for name in ["", "Alice", ".hidden", "a*", "a)(uid=*", "bob@example.org", "a b"] {
            assert!(!USER_NAME.is_match(name), "{}", name);
        }
        assert!(!USER_NAME.is_match(&"a".repeat(65)));
    }

    #[test]
    fn test_first_rdn_value() {
        assert_eq!(first_rdn_value("uid=alice,ou=people,dc=example,dc=org"), Some("alice"));
        assert_eq!(first_rdn_value("uid= bob ,ou=people"), Some("bob"));
        assert_eq!(first_rdn_value("alice"), None);
        assert_eq!(first_rdn_value("uid=,ou=people"), None);
    }

    #[test]
    fn test_device_entry() {
        let layout = SchemaLayout::default();
        let entry = layout.device_entry("aabbccddeeff", AuthType::Dot1x, "alice");

        assert_eq!(entry.dn, "macAddress=aabbccddeeff,ou=devices,dc=example,dc=org");
        assert_eq!(entry.first("authType"), Some("802.1X"));
        assert_eq!(entry.first("uidProprio"), Some("uid=alice,ou=people,dc=example,dc=org"));
        assert_eq!(entry.first("objectClass"), Some("reselDevice"));
    }

    #[test]
    fn test_user_entry_splits_room() {
        let layout = SchemaLayout::default();
        let user = User {
            name: "alice".to_string(),
            password_hash: "{SSHA}x".to_string(),
            nt_password_hash: "ABCD".to_string(),
            subscription_end: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            room_name: "I11-012".to_string(),
        };
        let entry = layout.user_entry(&user);
        assert_eq!(entry.first("batiment"), Some("I11"));
        assert_eq!(entry.first("roomNumber"), Some("012"));
        assert_eq!(entry.first("endInternet"), Some("20300101000000Z"));
    }

    #[test]
    fn test_layout_validation() {
        assert!(SchemaLayout::default().validate().is_ok());

        let mut layout = SchemaLayout::default();
        layout.zones_dn = String::new();
        assert!(layout.validate().is_err());

        let mut layout = SchemaLayout::default();
        layout.default_vlan = 5000;
        assert!(layout.validate().is_err());
    }
}
