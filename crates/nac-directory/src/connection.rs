//! Connection seam between the failover client and a concrete directory
//!
//! The client only ever needs three operations: an exact-match point query,
//! a single-attribute replace and an entry add. Anything implementing
//! [`DirectoryConnector`] can sit behind the pool.

use crate::error::ConnectionError;
use async_trait::async_trait;
use std::collections::HashMap;

/// Exact match of one attribute under a base DN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Search base
    pub base: String,
    /// Optional object class restriction
    pub object_class: Option<String>,
    /// Attribute to match
    pub attribute: String,
    /// Value the attribute must equal
    pub value: String,
}

impl Query {
    /// Match `attribute=value` anywhere under `base`
    pub fn new(base: impl Into<String>, attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Query {
            base: base.into(),
            object_class: None,
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Restrict matches to entries of the given object class
    pub fn with_object_class(mut self, object_class: impl Into<String>) -> Self {
        self.object_class = Some(object_class.into());
        self
    }
}

/// A directory record: DN plus multi-valued attributes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attrs: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        DirectoryEntry {
            dn: dn.into(),
            attrs: HashMap::new(),
        }
    }

    /// Add a value to an attribute (builder style)
    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs
            .entry(attribute.into())
            .or_default()
            .push(value.into());
        self
    }

    /// First value of an attribute, compared case-insensitively on the name
    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }

    /// Keep only the requested attributes
    pub fn project(&self, attributes: &[&str]) -> DirectoryEntry {
        let attrs = self
            .attrs
            .iter()
            .filter(|(name, _)| attributes.iter().any(|a| a.eq_ignore_ascii_case(name)))
            .map(|(name, values)| (name.clone(), values.clone()))
            .collect();
        DirectoryEntry {
            dn: self.dn.clone(),
            attrs,
        }
    }
}

/// Opens connections to individual endpoints
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    /// Open and authenticate a connection to `address`
    async fn connect(&self, address: &str) -> Result<Box<dyn DirectoryConnection>, ConnectionError>;
}

/// One live connection to one endpoint
///
/// Implementations are driven by exactly one caller at a time.
#[async_trait]
pub trait DirectoryConnection: Send {
    /// Return the first entry matching `query`, projected to `attributes`
    async fn find(
        &mut self,
        query: &Query,
        attributes: &[&str],
    ) -> Result<Option<DirectoryEntry>, ConnectionError>;

    /// Replace the values of a single attribute
    async fn modify(&mut self, dn: &str, attribute: &str, value: &str) -> Result<(), ConnectionError>;

    /// Create a new entry
    async fn add(&mut self, entry: &DirectoryEntry) -> Result<(), ConnectionError>;

    /// Release the connection; failures are ignored
    async fn close(&mut self);
}
