//! Resilient directory access for network access control
//!
//! This crate provides failover access to a replicated directory (one or
//! more read-write masters plus read-only replicas) and typed accessors for
//! the records a NAC backend needs.
//!
//! # Features
//!
//! - Endpoint pool with role-aware, shuffled selection and crash cooldown
//! - Single-connection client with bounded failover and read-only detection
//! - LDAP backend (`ldap3`) and an in-memory backend with fault injection
//! - Typed users, devices and room VLAN lookups
//!
//! # Example
//!
//! ```rust
//! use nac_directory::{AddressPool, DirectoryClient, DirectorySchema, EndpointConfig, MemoryDirectory, SchemaLayout};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let directory = MemoryDirectory::new().with_node("mem://master", false);
//! let pool = AddressPool::new(
//!     vec![EndpointConfig::read_write("mem://master")],
//!     Duration::from_secs(300),
//! )
//! .unwrap();
//!
//! let client = Arc::new(DirectoryClient::new(pool, Arc::new(directory)));
//! let schema = DirectorySchema::new(client, SchemaLayout::default());
//! assert_eq!(schema.layout().default_vlan, 1000);
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod ldap;
pub mod memory;
pub mod models;
pub mod pool;
pub mod schema;

pub use client::DirectoryClient;
pub use config::DirectoryConfig;
pub use connection::{DirectoryConnection, DirectoryConnector, DirectoryEntry, Query};
pub use error::{ConnectionError, DirectoryError, DirectoryResult};
pub use ldap::LdapConnector;
pub use memory::MemoryDirectory;
pub use models::{AuthType, Device, User, format_generalized_time, parse_generalized_time};
pub use pool::{AddressPool, EndpointConfig, EndpointRole, MemberStatus, PoolMember};
pub use schema::{DirectorySchema, SchemaLayout};
