//! NAS-address VLAN policy

use crate::config::{ConfigError, NasVlanConfig};
use ipnetwork::Ipv4Network;
use std::net::IpAddr;
use tracing::warn;

/// Maps the address of a switch to its building VLAN
///
/// Switches in the wired network encode their building in the bits selected
/// by the building mask; anything else (access points, IPv6) gets the
/// wireless VLAN.
#[derive(Debug, Clone)]
pub struct NasVlanPolicy {
    switch_network: Ipv4Network,
    building_mask: u32,
    building_vlan_base: u16,
    wireless_vlan: u16,
}

impl NasVlanPolicy {
    pub fn from_config(config: &NasVlanConfig) -> Result<Self, ConfigError> {
        let building_mask = u32::from(config.building_mask);
        if building_mask == 0 {
            return Err(ConfigError::Invalid("Building mask cannot be empty".to_string()));
        }

        Ok(NasVlanPolicy {
            switch_network: config.parse_network()?,
            building_mask,
            building_vlan_base: config.building_vlan_base,
            wireless_vlan: config.wireless_vlan,
        })
    }

    /// Building index of a switch address
    fn building(&self, ip: u32) -> u32 {
        (ip & self.building_mask) >> self.building_mask.trailing_zeros()
    }

    /// VLAN for clients behind the given NAS
    pub fn vlan_for(&self, nas: IpAddr) -> u16 {
        let IpAddr::V4(v4) = nas else {
            return self.wireless_vlan;
        };
        if !self.switch_network.contains(v4) {
            return self.wireless_vlan;
        }

        let building = self.building(u32::from(v4));
        match u16::try_from(u32::from(self.building_vlan_base) + building) {
            Ok(vlan) if vlan <= 4094 => vlan,
            _ => {
                warn!(nas = %nas, building, "Building VLAN out of range, using wireless VLAN");
                self.wireless_vlan
            }
        }
    }

    /// Same as [`vlan_for`](Self::vlan_for) for an unparsed address
    pub fn vlan_for_str(&self, nas: &str) -> u16 {
        match nas.trim().parse() {
            Ok(ip) => self.vlan_for(ip),
            Err(_) => {
                warn!(nas = %nas, "Unparseable NAS address, using wireless VLAN");
                self.wireless_vlan
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> NasVlanPolicy {
        NasVlanPolicy::from_config(&NasVlanConfig {
            switch_network: "10.10.0.0/16".to_string(),
            building_mask: "0.0.255.0".parse().unwrap(),
            building_vlan_base: 1390,
            wireless_vlan: 1500,
        })
        .unwrap()
    }

    #[test]
    fn test_switch_vlan_from_building_bits() {
        let policy = policy();
        assert_eq!(policy.vlan_for("10.10.0.1".parse().unwrap()), 1390);
        assert_eq!(policy.vlan_for("10.10.7.20".parse().unwrap()), 1397);
        assert_eq!(policy.vlan_for_str("10.10.42.254"), 1432);
    }

    #[test]
    fn test_outside_switch_network_is_wireless() {
        let policy = policy();
        assert_eq!(policy.vlan_for("10.20.7.20".parse().unwrap()), 1500);
        assert_eq!(policy.vlan_for("fe80::1".parse().unwrap()), 1500);
        assert_eq!(policy.vlan_for_str("switch-1"), 1500);
    }

    #[test]
    fn test_overflowing_building_is_wireless() {
        let policy = NasVlanPolicy::from_config(&NasVlanConfig {
            switch_network: "10.0.0.0/8".to_string(),
            building_mask: "0.255.255.0".parse().unwrap(),
            building_vlan_base: 1390,
            wireless_vlan: 1500,
        })
        .unwrap();
        assert_eq!(policy.vlan_for("10.200.0.1".parse().unwrap()), 1500);
        assert_eq!(policy.vlan_for("10.0.3.1".parse().unwrap()), 1393);
    }

    #[test]
    fn test_empty_mask_rejected() {
        let result = NasVlanPolicy::from_config(&NasVlanConfig {
            switch_network: "10.10.0.0/16".to_string(),
            building_mask: "0.0.0.0".parse().unwrap(),
            building_vlan_base: 1390,
            wireless_vlan: 1500,
        });
        assert!(result.is_err());
    }
}
