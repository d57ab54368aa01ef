use ipnetwork::Ipv4Network;
use nac_directory::{DirectoryConfig, EndpointConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<nac_directory::DirectoryError> for ConfigError {
    fn from(e: nac_directory::DirectoryError) -> Self {
        ConfigError::Invalid(e.to_string())
    }
}

/// VLAN derived from the NAS address instead of the owner's room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NasVlanConfig {
    /// Network the wired switches live in (CIDR)
    pub switch_network: String,
    /// Bits of the switch address that encode the building
    pub building_mask: Ipv4Addr,
    /// VLAN of building 0
    #[serde(default = "default_building_vlan_base")]
    pub building_vlan_base: u16,
    /// VLAN for NAS outside the switch network (access points)
    pub wireless_vlan: u16,
}

fn default_building_vlan_base() -> u16 {
    1390
}

impl NasVlanConfig {
    pub fn parse_network(&self) -> Result<Ipv4Network, ConfigError> {
        self.switch_network
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("Invalid switch network: {}", self.switch_network)))
    }
}

/// VLAN assignment settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanConfig {
    /// VLAN for clients whose subscription has ended
    #[serde(default = "default_quarantine_vlan")]
    pub quarantine_vlan: u16,

    /// Derive the authentication VLAN from the NAS address (optional)
    #[serde(default)]
    pub nas_policy: Option<NasVlanConfig>,
}

fn default_quarantine_vlan() -> u16 {
    999
}

impl Default for VlanConfig {
    fn default() -> Self {
        VlanConfig {
            quarantine_vlan: default_quarantine_vlan(),
            nas_policy: None,
        }
    }
}

/// Queue receiving VLAN change tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskQueueConfig {
    /// Redis URL (e.g. "redis://:password@localhost:6379")
    pub url: String,
    /// List the tasks are pushed onto
    #[serde(default = "default_queue_key")]
    pub key: String,
}

fn default_queue_key() -> String {
    "queue:tasks".to_string()
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server listen address
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Server listen port
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Log level: "trace", "debug", "info", "warn", "error" (default: "info")
    #[serde(default)]
    pub log_level: Option<String>,

    /// Audit log file path for authentication decisions (JSON lines, optional)
    #[serde(default)]
    pub audit_log_path: Option<String>,

    /// Accounting log file path (JSON lines, optional)
    #[serde(default)]
    pub accounting_log_path: Option<String>,

    /// End-to-end deadline for one decision, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Directory endpoints and layout
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// VLAN assignment
    #[serde(default)]
    pub vlans: VlanConfig,

    /// VLAN task queue; tasks are dropped when unset
    #[serde(default)]
    pub task_queue: Option<TaskQueueConfig>,
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    4000
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_address: default_listen_address(),
            listen_port: default_listen_port(),
            log_level: None,
            audit_log_path: None,
            accounting_log_path: None,
            request_timeout: default_request_timeout(),
            directory: DirectoryConfig::default(),
            vlans: VlanConfig::default(),
            task_queue: None,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Get socket address for binding
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr: IpAddr = self
            .listen_address
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("Invalid IP address: {}", self.listen_address)))?;
        Ok(SocketAddr::new(addr, self.listen_port))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;

        if self.listen_port == 0 {
            return Err(ConfigError::Invalid("Port cannot be 0".to_string()));
        }

        if self.request_timeout == 0 {
            return Err(ConfigError::Invalid("Request timeout cannot be 0".to_string()));
        }

        self.directory.validate()?;

        let vlans = &self.vlans;
        check_vlan("quarantine_vlan", vlans.quarantine_vlan)?;
        if let Some(ref policy) = vlans.nas_policy {
            policy.parse_network()?;
            if policy.building_mask.is_unspecified() {
                return Err(ConfigError::Invalid("Building mask cannot be empty".to_string()));
            }
            check_vlan("wireless_vlan", policy.wireless_vlan)?;
            check_vlan("building_vlan_base", policy.building_vlan_base)?;
        }

        if let Some(ref queue) = self.task_queue {
            if queue.url.is_empty() {
                return Err(ConfigError::Invalid("Task queue URL cannot be empty".to_string()));
            }
            if queue.key.is_empty() {
                return Err(ConfigError::Invalid("Task queue key cannot be empty".to_string()));
            }
        }

        Ok(())
    }

    /// Create an example configuration file
    pub fn example() -> Self {
        Config {
            listen_address: "0.0.0.0".to_string(),
            listen_port: 4000,
            log_level: Some("info".to_string()),
            audit_log_path: Some("/var/log/nac/authentication.log".to_string()),
            accounting_log_path: Some("/var/log/nac/accounting.log".to_string()),
            request_timeout: 10,
            directory: DirectoryConfig {
                endpoints: vec![
                    EndpointConfig::read_write("ldaps://ldap-master.example.org:636"),
                    EndpointConfig::read_only("ldaps://ldap-replica1.example.org:636"),
                    EndpointConfig::read_only("ldaps://ldap-replica2.example.org:636"),
                ],
                bind_dn: Some("cn=radius,ou=services,dc=example,dc=org".to_string()),
                bind_password: Some("changeme".to_string()),
                ..DirectoryConfig::default()
            },
            vlans: VlanConfig {
                quarantine_vlan: 999,
                nas_policy: None,
            },
            task_queue: Some(TaskQueueConfig {
                url: "redis://127.0.0.1:6379".to_string(),
                key: default_queue_key(),
            }),
        }
    }
}

fn check_vlan(name: &str, vlan: u16) -> Result<(), ConfigError> {
    if vlan == 0 || vlan > 4094 {
        return Err(ConfigError::Invalid(format!("{} {} is not a valid VLAN id", name, vlan)));
    }
    Ok(())
}
