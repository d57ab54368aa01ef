//! Network access control backend
//!
//! This crate answers the REST calls of a RADIUS server: it decides whether a
//! MAC or user/device pair may join the network and on which VLAN, keeps the
//! directory's device records current, and tracks accounting sessions. All
//! directory access goes through [`nac_directory`].
//!
//! # Features
//!
//! - MAC authentication and 802.1X with device self-registration
//! - Subscription checks with quarantine VLAN
//! - VLAN from the owner's room or from the NAS address
//! - Accounting ledger with ordering guards and traffic deltas
//! - JSON-lines audit and accounting logs
//! - VLAN tasks pushed to Redis
//!
//! # Example
//!
//! ```rust,no_run
//! use nac_server::{Config, NacServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("config.json")?;
//!     let server = NacServer::new(&config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod accounting;
pub mod audit;
pub mod config;
pub mod decision;
pub mod health;
pub mod request;
pub mod routes;
pub mod server;
pub mod tasks;
pub mod vlan;

pub use accounting::{AccountingSession, AccountingTracker, Counters, Deltas, IgnoreReason, Transition};
pub use audit::{AuditEntry, AuditEventType, AuditLogger};
pub use config::{Config, ConfigError, NasVlanConfig, TaskQueueConfig, VlanConfig};
pub use decision::{
    AuthOutcome, Decision, DecisionEngine, PostAuthDecision, PostAuthOutcome, Reply, VlanAssignment,
};
pub use health::HealthStatus;
pub use request::{AccessRequest, AuthMode};
pub use routes::router;
pub use server::{AppState, NacServer, ServerError};
pub use tasks::{MemoryTaskQueue, NoopTaskQueue, RedisTaskQueue, TaskError, TaskQueue, VlanTask};
pub use vlan::NasVlanPolicy;
