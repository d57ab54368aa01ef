//! Directory endpoint pool and failover selection
//!
//! The pool owns the health state of every configured directory endpoint and
//! decides which one the client should talk to next. Read-write endpoints are
//! always preferred over read-only replicas; within a role the order is
//! shuffled on every selection so that concurrent clients do not converge on
//! the same replica.
//!
//! Health is tracked with timestamps rather than probes: a member that
//! crashed (or refused a write while nominally read-write) is excluded until
//! its cooldown has elapsed, then it is tried again.

use crate::error::{DirectoryError, DirectoryResult};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Default time a crashed or read-only member is kept out of rotation
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);

/// Whether an endpoint accepts modifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointRole {
    /// Master: accepts reads and writes
    ReadWrite,
    /// Replica: reads only
    ReadOnly,
}

/// Endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Directory URL (e.g. "ldaps://ldap1.example.org:636")
    pub address: String,

    /// Endpoint role
    #[serde(default = "default_role")]
    pub role: EndpointRole,
}

fn default_role() -> EndpointRole {
    EndpointRole::ReadOnly
}

impl EndpointConfig {
    pub fn read_write(address: impl Into<String>) -> Self {
        EndpointConfig {
            address: address.into(),
            role: EndpointRole::ReadWrite,
        }
    }

    pub fn read_only(address: impl Into<String>) -> Self {
        EndpointConfig {
            address: address.into(),
            role: EndpointRole::ReadOnly,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> DirectoryResult<()> {
        if self.address.trim().is_empty() {
            return Err(DirectoryError::Configuration(
                "Directory endpoint address cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Health state of one endpoint
#[derive(Debug, Clone)]
pub struct PoolMember {
    address: String,
    role: EndpointRole,
    up: bool,
    last_crash: Option<Instant>,
    last_read_only_rejection: Option<Instant>,
}

impl PoolMember {
    fn new(config: EndpointConfig) -> Self {
        PoolMember {
            address: config.address,
            role: config.role,
            up: true,
            last_crash: None,
            last_read_only_rejection: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn role(&self) -> EndpointRole {
        self.role
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    pub fn last_crash(&self) -> Option<Instant> {
        self.last_crash
    }

    pub fn last_read_only_rejection(&self) -> Option<Instant> {
        self.last_read_only_rejection
    }

    /// Up, or down long enough ago to deserve another try
    fn is_available(&self, now: Instant, cooldown: Duration) -> bool {
        self.up || elapsed_beyond(self.last_crash, now, cooldown)
    }

    /// Available and not recently caught refusing writes
    fn is_writable(&self, now: Instant, cooldown: Duration) -> bool {
        self.role == EndpointRole::ReadWrite
            && self.is_available(now, cooldown)
            && elapsed_beyond(self.last_read_only_rejection, now, cooldown)
    }

    fn reset(&mut self) {
        self.up = true;
        self.last_crash = None;
        self.last_read_only_rejection = None;
    }
}

fn elapsed_beyond(mark: Option<Instant>, now: Instant, cooldown: Duration) -> bool {
    mark.is_none_or(|at| now.saturating_duration_since(at) > cooldown)
}

/// The member the pool handed out, as seen by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub index: usize,
    pub address: String,
    pub role: EndpointRole,
}

/// Point-in-time view of a member, for health reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberStatus {
    pub address: String,
    pub role: EndpointRole,
    pub up: bool,
    pub current: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_since_crash: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_since_read_only: Option<u64>,
}

/// Endpoint pool with failover selection
#[derive(Debug)]
pub struct AddressPool {
    members: Vec<PoolMember>,
    current: Option<usize>,
    cooldown: Duration,
}

impl AddressPool {
    /// Create a pool from a static endpoint list
    pub fn new(endpoints: Vec<EndpointConfig>, cooldown: Duration) -> DirectoryResult<Self> {
        if endpoints.is_empty() {
            return Err(DirectoryError::Configuration(
                "Directory pool has no endpoints configured".to_string(),
            ));
        }
        for endpoint in &endpoints {
            endpoint.validate()?;
        }

        Ok(AddressPool {
            members: endpoints.into_iter().map(PoolMember::new).collect(),
            current: None,
            cooldown,
        })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn members(&self) -> &[PoolMember] {
        &self.members
    }

    pub fn member(&self, index: usize) -> Option<&PoolMember> {
        self.members.get(index)
    }

    /// Currently selected member, if any
    pub fn current(&self) -> Option<&PoolMember> {
        self.current.and_then(|index| self.members.get(index))
    }

    /// Select the next endpoint to try
    ///
    /// The previously selected member, if any, is marked crashed first: the
    /// caller only asks for another endpoint because the current one failed.
    pub fn next(&mut self) -> DirectoryResult<Selection> {
        self.next_at(Instant::now())
    }

    pub fn next_at(&mut self, now: Instant) -> DirectoryResult<Selection> {
        if let Some(previous) = self.current.take() {
            self.mark_crashed_at(previous, now);
        }
        self.select_at(now)
    }

    /// Forget the current selection without holding it responsible
    ///
    /// Used when a read-only replica refuses a write: the replica is healthy,
    /// it just cannot serve that operation.
    pub fn release(&mut self) {
        self.current = None;
    }

    fn select_at(&mut self, now: Instant) -> DirectoryResult<Selection> {
        let mut rng = rand::thread_rng();

        let mut writable = self.writable_candidates(now);
        let mut readable: Vec<usize> = self
            .members
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == EndpointRole::ReadOnly && m.is_available(now, self.cooldown))
            .map(|(index, _)| index)
            .collect();

        writable.shuffle(&mut rng);
        readable.shuffle(&mut rng);

        let Some(index) = writable.into_iter().chain(readable).next() else {
            error!(
                members = self.members.len(),
                "All directory endpoints exhausted, resetting pool"
            );
            for member in &mut self.members {
                member.reset();
            }
            self.current = None;
            return Err(DirectoryError::Unavailable);
        };

        self.current = Some(index);
        let member = &self.members[index];
        debug!(address = %member.address, role = ?member.role, "Selected directory endpoint");

        Ok(Selection {
            index,
            address: member.address.clone(),
            role: member.role,
        })
    }

    fn writable_candidates(&self, now: Instant) -> Vec<usize> {
        self.members
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_writable(now, self.cooldown))
            .map(|(index, _)| index)
            .collect()
    }

    pub fn mark_crashed(&mut self, index: usize) {
        self.mark_crashed_at(index, Instant::now());
    }

    pub fn mark_crashed_at(&mut self, index: usize, now: Instant) {
        if let Some(member) = self.members.get_mut(index) {
            warn!(address = %member.address, "Marking directory endpoint down");
            member.up = false;
            member.last_crash = Some(now);
        }
    }

    pub fn mark_read_only_rejected(&mut self, index: usize) {
        self.mark_read_only_rejected_at(index, Instant::now());
    }

    pub fn mark_read_only_rejected_at(&mut self, index: usize, now: Instant) {
        if let Some(member) = self.members.get_mut(index) {
            warn!(address = %member.address, "Read-write endpoint refused a write");
            member.last_read_only_rejection = Some(now);
        }
    }

    /// Record a successful connection
    pub fn mark_healthy(&mut self, index: usize) {
        if let Some(member) = self.members.get_mut(index) {
            member.up = true;
        }
    }

    /// Whether any read-write member is currently worth trying for a write
    pub fn has_writable(&self) -> bool {
        self.has_writable_at(Instant::now())
    }

    pub fn has_writable_at(&self, now: Instant) -> bool {
        self.members.iter().any(|m| m.is_writable(now, self.cooldown))
    }

    /// Whether any member at all is currently worth trying
    pub fn has_available_at(&self, now: Instant) -> bool {
        self.members
            .iter()
            .any(|m| m.is_available(now, self.cooldown))
    }

    pub fn status_at(&self, now: Instant) -> Vec<MemberStatus> {
        self.members
            .iter()
            .enumerate()
            .map(|(index, m)| MemberStatus {
                address: m.address.clone(),
                role: m.role,
                up: m.up,
                current: self.current == Some(index),
                seconds_since_crash: m
                    .last_crash
                    .map(|at| now.saturating_duration_since(at).as_secs()),
                seconds_since_read_only: m
                    .last_read_only_rejection
                    .map(|at| now.saturating_duration_since(at).as_secs()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn pool(rw: usize, ro: usize) -> AddressPool {
        let mut endpoints = Vec::new();
        for i in 0..rw {
            endpoints.push(EndpointConfig::read_write(format!("ldaps://master{}", i)));
        }
        for i in 0..ro {
            endpoints.push(EndpointConfig::read_only(format!("ldaps://replica{}", i)));
        }
        AddressPool::new(endpoints, DEFAULT_COOLDOWN).unwrap()
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert!(AddressPool::new(vec![], DEFAULT_COOLDOWN).is_err());
        assert!(AddressPool::new(vec![EndpointConfig::read_only(" ")], DEFAULT_COOLDOWN).is_err());
    }

    #[test]
    fn test_read_write_members_exhausted_before_replicas() {
        let mut pool = pool(2, 3);
        let now = Instant::now();

        let first = pool.next_at(now).unwrap();
        let second = pool.next_at(now).unwrap();
        assert_eq!(first.role, EndpointRole::ReadWrite);
        assert_eq!(second.role, EndpointRole::ReadWrite);
        assert_ne!(first.index, second.index);

        let mut replicas = Vec::new();
        for _ in 0..3 {
            let selection = pool.next_at(now).unwrap();
            assert_eq!(selection.role, EndpointRole::ReadOnly);
            replicas.push(selection.index);
        }
        replicas.sort();
        replicas.dedup();
        assert_eq!(replicas.len(), 3);

        assert_eq!(pool.next_at(now), Err(DirectoryError::Unavailable));
    }

    #[test]
    fn test_exhaustion_resets_members() {
        let mut pool = pool(1, 1);
        let now = Instant::now();

        pool.next_at(now).unwrap();
        pool.next_at(now).unwrap();
        assert!(pool.next_at(now).is_err());

        assert!(pool.current().is_none());
        assert!(pool.members().iter().all(|m| m.is_up() && m.last_crash().is_none()));

        // The next cycle starts optimistically, master first
        let selection = pool.next_at(now).unwrap();
        assert_eq!(selection.role, EndpointRole::ReadWrite);
    }

    #[test]
    fn test_selection_within_role_is_not_biased() {
        let mut counts: HashMap<usize, usize> = HashMap::new();
        for _ in 0..2000 {
            let mut pool = pool(2, 0);
            let selection = pool.next().unwrap();
            *counts.entry(selection.index).or_default() += 1;
        }
        assert_eq!(counts.len(), 2);
        assert!(counts.values().all(|&n| n > 800), "skewed selection: {:?}", counts);
    }

    #[test]
    fn test_crashed_member_cooldown() {
        let mut pool = pool(1, 1);
        let t0 = Instant::now();

        pool.mark_crashed_at(0, t0);

        let selection = pool.next_at(t0 + Duration::from_secs(299)).unwrap();
        assert_eq!(selection.index, 1, "master still cooling down");
        pool.release();

        let selection = pool.next_at(t0 + Duration::from_secs(301)).unwrap();
        assert_eq!(selection.index, 0, "master back after cooldown");
    }

    #[test]
    fn test_next_marks_previous_selection_crashed() {
        let mut pool = pool(1, 1);
        let now = Instant::now();

        let first = pool.next_at(now).unwrap();
        assert_eq!(first.index, 0);
        pool.next_at(now).unwrap();

        let master = pool.member(0).unwrap();
        assert!(!master.is_up());
        assert_eq!(master.last_crash(), Some(now));
    }

    #[test]
    fn test_mark_healthy_restores_member() {
        let mut pool = pool(1, 0);
        let now = Instant::now();
        pool.mark_crashed_at(0, now);
        assert!(!pool.has_available_at(now));

        pool.mark_healthy(0);
        assert!(pool.has_available_at(now));
    }

    #[test]
    fn test_read_only_rejection_disables_writes() {
        let mut pool = pool(1, 2);
        let t0 = Instant::now();
        assert!(pool.has_writable_at(t0));

        pool.mark_read_only_rejected_at(0, t0);
        assert!(!pool.has_writable_at(t0 + Duration::from_secs(10)));
        assert!(pool.has_writable_at(t0 + Duration::from_secs(301)));

        // Replicas still serve reads
        let selection = pool.next_at(t0 + Duration::from_secs(10)).unwrap();
        assert_eq!(selection.role, EndpointRole::ReadOnly);
    }

    #[test]
    fn test_replica_only_pool_has_no_writable() {
        let pool = pool(0, 2);
        assert!(!pool.has_writable());
        assert!(pool.has_available_at(Instant::now()));
    }

    #[test]
    fn test_status_report() {
        let mut pool = pool(1, 1);
        let t0 = Instant::now();
        pool.next_at(t0).unwrap();
        pool.next_at(t0).unwrap();

        let status = pool.status_at(t0 + Duration::from_secs(42));
        assert_eq!(status.len(), 2);
        assert!(!status[0].up);
        assert_eq!(status[0].seconds_since_crash, Some(42));
        assert!(status[1].current);
        assert!(status[1].seconds_since_crash.is_none());
    }

    #[test]
    fn test_endpoint_config_role_defaults_to_read_only() {
        let config: EndpointConfig =
            serde_json::from_str(r#"{ "address": "ldaps://replica" }"#).unwrap();
        assert_eq!(config.role, EndpointRole::ReadOnly);

        let config: EndpointConfig =
            serde_json::from_str(r#"{ "address": "ldaps://master", "role": "read_write" }"#).unwrap();
        assert_eq!(config.role, EndpointRole::ReadWrite);
    }
}
