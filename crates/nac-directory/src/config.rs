//! Directory pool and schema configuration

use crate::error::{DirectoryError, DirectoryResult};
use crate::pool::{AddressPool, EndpointConfig, EndpointRole};
use crate::schema::SchemaLayout;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Directory access configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Endpoints, masters and replicas alike
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,

    /// Service account DN; anonymous bind when unset
    #[serde(default)]
    pub bind_dn: Option<String>,

    /// Service account password
    #[serde(default)]
    pub bind_password: Option<String>,

    /// Connection establishment timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Per-operation timeout in seconds
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout: u64,

    /// Seconds a failed or read-only member stays out of rotation
    #[serde(default = "default_cooldown")]
    pub cooldown: u64,

    /// Where users, devices, rooms and zones live
    #[serde(default)]
    pub schema: SchemaLayout,
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_operation_timeout() -> u64 {
    10
}

fn default_cooldown() -> u64 {
    300
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        DirectoryConfig {
            endpoints: vec![],
            bind_dn: None,
            bind_password: None,
            connect_timeout: default_connect_timeout(),
            operation_timeout: default_operation_timeout(),
            cooldown: default_cooldown(),
            schema: SchemaLayout::default(),
        }
    }
}

impl DirectoryConfig {
    /// Validate configuration
    pub fn validate(&self) -> DirectoryResult<()> {
        if self.endpoints.is_empty() {
            return Err(DirectoryError::Configuration(
                "No directory endpoints configured".to_string(),
            ));
        }

        for endpoint in &self.endpoints {
            endpoint.validate()?;
        }

        if self.connect_timeout == 0 {
            return Err(DirectoryError::Configuration(
                "Directory connect timeout cannot be 0".to_string(),
            ));
        }

        if self.operation_timeout == 0 {
            return Err(DirectoryError::Configuration(
                "Directory operation timeout cannot be 0".to_string(),
            ));
        }

        if self.cooldown == 0 {
            return Err(DirectoryError::Configuration(
                "Endpoint cooldown cannot be 0".to_string(),
            ));
        }

        if self.bind_dn.is_some() != self.bind_password.is_some() {
            return Err(DirectoryError::Configuration(
                "bind_dn and bind_password must be set together".to_string(),
            ));
        }

        self.schema.validate()
    }

    /// Number of read-write endpoints
    pub fn writable_endpoints(&self) -> usize {
        self.endpoints
            .iter()
            .filter(|e| e.role == EndpointRole::ReadWrite)
            .count()
    }

    /// Build the endpoint pool
    pub fn build_pool(&self) -> DirectoryResult<AddressPool> {
        AddressPool::new(self.endpoints.clone(), Duration::from_secs(self.cooldown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DirectoryConfig {
        DirectoryConfig {
            endpoints: vec![
                EndpointConfig::read_write("ldaps://master.example.org"),
                EndpointConfig::read_only("ldaps://replica.example.org"),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = DirectoryConfig::default();
        assert_eq!(config.connect_timeout, 5);
        assert_eq!(config.operation_timeout, 10);
        assert_eq!(config.cooldown, 300);
    }

    #[test]
    fn test_validation() {
        assert!(config().validate().is_ok());
        assert!(DirectoryConfig::default().validate().is_err());

        let mut half_bound = config();
        half_bound.bind_dn = Some("cn=radius,dc=example,dc=org".to_string());
        assert!(half_bound.validate().is_err());
    }

    #[test]
    fn test_zero_timers_rejected() {
        let mut no_cooldown = config();
        no_cooldown.cooldown = 0;
        assert!(matches!(
            no_cooldown.validate(),
            Err(DirectoryError::Configuration(ref msg)) if msg.contains("cooldown")
        ));

        let mut no_operation_timeout = config();
        no_operation_timeout.operation_timeout = 0;
        assert!(no_operation_timeout.validate().is_err());

        let json = r#"{
            "endpoints": [{ "address": "ldaps://master.example.org", "role": "read_write" }],
            "cooldown": 0
        }"#;
        let config: DirectoryConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_build_pool() {
        let config = config();
        assert_eq!(config.writable_endpoints(), 1);

        let pool = config.build_pool().unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.cooldown(), Duration::from_secs(300));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{
            "endpoints": [
                { "address": "ldaps://master.example.org", "role": "read_write" },
                { "address": "ldaps://replica.example.org" }
            ]
        }"#;
        let config: DirectoryConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[1].role, EndpointRole::ReadOnly);
        assert_eq!(config.schema, SchemaLayout::default());
    }
}
