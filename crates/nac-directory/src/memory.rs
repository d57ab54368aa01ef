//! In-memory directory
//!
//! A single shared entry store served by any number of named nodes. Nodes can
//! be taken down or made read-only at runtime, and every connection, search
//! and write is counted, which makes it the directory of choice for tests
//! and for running the server without an LDAP deployment.

use crate::connection::{DirectoryConnection, DirectoryConnector, DirectoryEntry, Query};
use crate::error::{ConnectionError, ENTRY_ALREADY_EXISTS, NO_SUCH_OBJECT};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct NodeState {
    reachable: bool,
    read_only: bool,
}

#[derive(Debug, Default)]
struct Inner {
    /// Entries keyed by lower-cased DN
    entries: BTreeMap<String, DirectoryEntry>,
    nodes: HashMap<String, NodeState>,
    connects: HashMap<String, usize>,
    searches: usize,
    modifies: usize,
    adds: usize,
}

/// Shared in-memory directory with per-node fault injection
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a node; read-only nodes refuse writes like a replica would
    pub fn add_node(&self, address: impl Into<String>, read_only: bool) {
        self.lock().nodes.insert(
            address.into(),
            NodeState {
                reachable: true,
                read_only,
            },
        );
    }

    /// Builder-style [`add_node`](Self::add_node)
    pub fn with_node(self, address: impl Into<String>, read_only: bool) -> Self {
        self.add_node(address, read_only);
        self
    }

    pub fn set_reachable(&self, address: &str, reachable: bool) {
        if let Some(node) = self.lock().nodes.get_mut(address) {
            node.reachable = reachable;
        }
    }

    pub fn set_read_only(&self, address: &str, read_only: bool) {
        if let Some(node) = self.lock().nodes.get_mut(address) {
            node.read_only = read_only;
        }
    }

    /// Store an entry directly, bypassing node state
    pub fn insert(&self, entry: DirectoryEntry) {
        self.lock().entries.insert(entry.dn.to_ascii_lowercase(), entry);
    }

    pub fn get(&self, dn: &str) -> Option<DirectoryEntry> {
        self.lock().entries.get(&dn.to_ascii_lowercase()).cloned()
    }

    pub fn remove(&self, dn: &str) -> Option<DirectoryEntry> {
        self.lock().entries.remove(&dn.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Connection attempts made to `address`, successful or not
    pub fn connect_count(&self, address: &str) -> usize {
        self.lock().connects.get(address).copied().unwrap_or(0)
    }

    pub fn total_connects(&self) -> usize {
        self.lock().connects.values().sum()
    }

    pub fn search_count(&self) -> usize {
        self.lock().searches
    }

    pub fn modify_count(&self) -> usize {
        self.lock().modifies
    }

    pub fn add_count(&self) -> usize {
        self.lock().adds
    }

    fn check_node(&self, address: &str) -> Result<NodeState, ConnectionError> {
        match self.lock().nodes.get(address) {
            Some(state) if state.reachable => Ok(*state),
            Some(_) => Err(ConnectionError::Transport(format!("{} is down", address))),
            None => Err(ConnectionError::Transport(format!("{}: no route to host", address))),
        }
    }
}

#[async_trait]
impl DirectoryConnector for MemoryDirectory {
    async fn connect(&self, address: &str) -> Result<Box<dyn DirectoryConnection>, ConnectionError> {
        *self.lock().connects.entry(address.to_string()).or_default() += 1;
        self.check_node(address)?;
        debug!(address = %address, "Opened in-memory directory connection");

        Ok(Box::new(MemoryConnection {
            directory: self.clone(),
            address: address.to_string(),
        }))
    }
}

/// A connection to one node of a [`MemoryDirectory`]
pub struct MemoryConnection {
    directory: MemoryDirectory,
    address: String,
}

impl MemoryConnection {
    fn writable(&self) -> Result<(), ConnectionError> {
        let state = self.directory.check_node(&self.address)?;
        if state.read_only {
            return Err(ConnectionError::ReadOnly(format!("{} is read-only", self.address)));
        }
        Ok(())
    }
}

fn under_base(dn: &str, base: &str) -> bool {
    let dn = dn.to_ascii_lowercase();
    let base = base.to_ascii_lowercase();
    dn == base || dn.ends_with(&format!(",{}", base))
}

fn matches(entry: &DirectoryEntry, query: &Query) -> bool {
    if !under_base(&entry.dn, &query.base) {
        return false;
    }

    let has_value = |attribute: &str, expected: &str| {
        entry
            .attrs
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .flat_map(|(_, values)| values)
            .any(|value| value.eq_ignore_ascii_case(expected))
    };

    if let Some(class) = &query.object_class
        && !has_value("objectClass", class)
    {
        return false;
    }
    has_value(&query.attribute, &query.value)
}

#[async_trait]
impl DirectoryConnection for MemoryConnection {
    async fn find(
        &mut self,
        query: &Query,
        attributes: &[&str],
    ) -> Result<Option<DirectoryEntry>, ConnectionError> {
        self.directory.check_node(&self.address)?;

        let mut inner = self.directory.lock();
        inner.searches += 1;
        Ok(inner
            .entries
            .values()
            .find(|entry| matches(entry, query))
            .map(|entry| entry.project(attributes)))
    }

    async fn modify(&mut self, dn: &str, attribute: &str, value: &str) -> Result<(), ConnectionError> {
        self.writable()?;

        let mut inner = self.directory.lock();
        let Some(entry) = inner.entries.get_mut(&dn.to_ascii_lowercase()) else {
            return Err(ConnectionError::Rejected {
                code: NO_SUCH_OBJECT,
                message: format!("no such object: {}", dn),
            });
        };
        entry.attrs.retain(|name, _| !name.eq_ignore_ascii_case(attribute));
        entry.attrs.insert(attribute.to_string(), vec![value.to_string()]);
        inner.modifies += 1;
        Ok(())
    }

    async fn add(&mut self, entry: &DirectoryEntry) -> Result<(), ConnectionError> {
        self.writable()?;

        let mut inner = self.directory.lock();
        let key = entry.dn.to_ascii_lowercase();
        if inner.entries.contains_key(&key) {
            return Err(ConnectionError::Rejected {
                code: ENTRY_ALREADY_EXISTS,
                message: format!("entry already exists: {}", entry.dn),
            });
        }
        inner.entries.insert(key, entry.clone());
        inner.adds += 1;
        Ok(())
    }

    async fn close(&mut self) {}
}
