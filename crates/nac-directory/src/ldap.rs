//! LDAP implementation of the directory connection seam
//!
//! Each connection binds with the service account configured for the pool.
//! LDAP result codes are sorted into the three kinds of failure the client
//! cares about: read-only refusals, operation rejections and everything else
//! (treated as the endpoint being unusable).

use crate::config::DirectoryConfig;
use crate::connection::{DirectoryConnection, DirectoryConnector, DirectoryEntry, Query};
use crate::error::{ConnectionError, NO_SUCH_OBJECT};
use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, Mod, Scope, SearchEntry, ldap_escape};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, error};

/// `strongerAuthRequired`: what a replica answers to a write
const STRONGER_AUTH_REQUIRED: u32 = 8;

/// `unwillingToPerform`: what a master in read-only mode answers to a write
const UNWILLING_TO_PERFORM: u32 = 53;

/// Opens bound LDAP connections
#[derive(Debug, Clone)]
pub struct LdapConnector {
    bind_dn: Option<String>,
    bind_password: Option<String>,
    connect_timeout: Duration,
    operation_timeout: Duration,
}

impl LdapConnector {
    pub fn new(config: &DirectoryConfig) -> Self {
        LdapConnector {
            bind_dn: config.bind_dn.clone(),
            bind_password: config.bind_password.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout),
            operation_timeout: Duration::from_secs(config.operation_timeout),
        }
    }
}

#[async_trait]
impl DirectoryConnector for LdapConnector {
    async fn connect(&self, address: &str) -> Result<Box<dyn DirectoryConnection>, ConnectionError> {
        debug!("Creating new LDAP connection to {}", address);
        let settings = LdapConnSettings::new().set_conn_timeout(self.connect_timeout);

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, address)
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;

        // Start connection driver
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                error!("LDAP connection driver error: {}", e);
            }
        });

        let (bind_dn, bind_password) = match (&self.bind_dn, &self.bind_password) {
            (Some(dn), Some(password)) => (dn.as_str(), password.as_str()),
            _ => ("", ""),
        };

        ldap.with_timeout(self.connect_timeout)
            .simple_bind(bind_dn, bind_password)
            .await
            .and_then(|result| result.success())
            .map_err(|e| ConnectionError::Transport(format!("bind failed: {}", e)))?;
        debug!(address = %address, bind_dn = %bind_dn, "Bound to LDAP");

        Ok(Box::new(LdapConnection {
            ldap,
            timeout: self.operation_timeout,
        }))
    }
}

/// A bound LDAP connection
pub struct LdapConnection {
    ldap: Ldap,
    timeout: Duration,
}

/// Build the search filter for a query, escaping the matched value
pub fn query_filter(query: &Query) -> String {
    let clause = format!("({}={})", query.attribute, ldap_escape(&query.value));
    match &query.object_class {
        Some(class) => format!("(&(objectClass={}){})", ldap_escape(class), clause),
        None => clause,
    }
}

fn classify(error: LdapError) -> ConnectionError {
    match error {
        LdapError::LdapResult { result } => match result.rc {
            STRONGER_AUTH_REQUIRED | UNWILLING_TO_PERFORM => ConnectionError::ReadOnly(result.text),
            // Busy, unavailable and server-side limits say nothing about the
            // request and everything about the endpoint
            51 | 52 | 80 => ConnectionError::Transport(format!("rc={}: {}", result.rc, result.text)),
            code => ConnectionError::Rejected {
                code,
                message: result.text,
            },
        },
        other => ConnectionError::Transport(other.to_string()),
    }
}

#[async_trait]
impl DirectoryConnection for LdapConnection {
    async fn find(
        &mut self,
        query: &Query,
        attributes: &[&str],
    ) -> Result<Option<DirectoryEntry>, ConnectionError> {
        let filter = query_filter(query);
        debug!(base = %query.base, filter = %filter, "Searching LDAP");

        let result = self
            .ldap
            .with_timeout(self.timeout)
            .search(&query.base, Scope::Subtree, &filter, attributes.to_vec())
            .await
            .map_err(classify)?;

        let entries = match result.success() {
            Ok((entries, _)) => entries,
            Err(LdapError::LdapResult { result }) if result.rc == NO_SUCH_OBJECT => Vec::new(),
            Err(e) => return Err(classify(e)),
        };

        Ok(entries.into_iter().next().map(|raw| {
            let entry = SearchEntry::construct(raw);
            DirectoryEntry {
                dn: entry.dn,
                attrs: entry.attrs,
            }
        }))
    }

    async fn modify(&mut self, dn: &str, attribute: &str, value: &str) -> Result<(), ConnectionError> {
        let values = HashSet::from([value]);
        self.ldap
            .with_timeout(self.timeout)
            .modify(dn, vec![Mod::Replace(attribute, values)])
            .await
            .and_then(|result| result.success())
            .map_err(classify)?;
        Ok(())
    }

    async fn add(&mut self, entry: &DirectoryEntry) -> Result<(), ConnectionError> {
        let attrs: Vec<(&str, HashSet<&str>)> = entry
            .attrs
            .iter()
            .map(|(name, values)| (name.as_str(), values.iter().map(String::as_str).collect()))
            .collect();

        self.ldap
            .with_timeout(self.timeout)
            .add(&entry.dn, attrs)
            .await
            .and_then(|result| result.success())
            .map_err(classify)?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.ldap.unbind().await {
            debug!(error = %e, "LDAP unbind failed");
        }
    }
}
