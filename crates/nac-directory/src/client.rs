//! Failover directory client
//!
//! [`DirectoryClient`] owns at most one live connection. Every operation runs
//! against that connection; when it fails the client asks the shared
//! [`AddressPool`] for another endpoint and retries. A call makes at most one
//! connection attempt per pool member, and each failure marks the member
//! down, so a call either succeeds, hits a read-only rejection, or exhausts
//! the pool.
//!
//! Operations are serialized through the connection lock, so there is never
//! more than one request in flight on a physical connection. The pool itself
//! sits behind its own lock and is shared with health reporting.

use crate::connection::{DirectoryConnection, DirectoryConnector, DirectoryEntry, Query};
use crate::error::{ConnectionError, DirectoryError, DirectoryResult};
use crate::pool::{AddressPool, EndpointRole, MemberStatus, Selection};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

/// An open connection and the pool member it belongs to
struct ActiveConnection {
    member: Selection,
    conn: Box<dyn DirectoryConnection>,
}

enum Operation<'a> {
    Find {
        query: &'a Query,
        attributes: &'a [&'a str],
    },
    Modify {
        dn: &'a str,
        attribute: &'a str,
        value: &'a str,
    },
    Add {
        entry: &'a DirectoryEntry,
    },
}

impl Operation<'_> {
    fn is_write(&self) -> bool {
        !matches!(self, Operation::Find { .. })
    }

    fn name(&self) -> &'static str {
        match self {
            Operation::Find { .. } => "search",
            Operation::Modify { .. } => "modify",
            Operation::Add { .. } => "add",
        }
    }

    async fn run(
        &self,
        conn: &mut dyn DirectoryConnection,
    ) -> Result<Option<DirectoryEntry>, ConnectionError> {
        match self {
            Operation::Find { query, attributes } => conn.find(query, attributes).await,
            Operation::Modify {
                dn,
                attribute,
                value,
            } => conn.modify(dn, attribute, value).await.map(|_| None),
            Operation::Add { entry } => conn.add(entry).await.map(|_| None),
        }
    }
}

/// Directory client with automatic failover across the pool
pub struct DirectoryClient {
    pool: Arc<Mutex<AddressPool>>,
    connector: Arc<dyn DirectoryConnector>,
    connection: AsyncMutex<Option<ActiveConnection>>,
}

impl DirectoryClient {
    /// Create a client; no connection is opened until the first operation
    pub fn new(pool: AddressPool, connector: Arc<dyn DirectoryConnector>) -> Self {
        DirectoryClient {
            pool: Arc::new(Mutex::new(pool)),
            connector,
            connection: AsyncMutex::new(None),
        }
    }

    fn lock_pool(&self) -> MutexGuard<'_, AddressPool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Health snapshot of every pool member
    pub fn pool_status(&self) -> Vec<MemberStatus> {
        self.lock_pool().status_at(Instant::now())
    }

    /// Whether any endpoint is currently worth trying
    pub fn is_available(&self) -> bool {
        self.lock_pool().has_available_at(Instant::now())
    }

    /// Whether a writable endpoint is currently known
    pub fn has_writable(&self) -> bool {
        self.lock_pool().has_writable()
    }

    /// Exact-match point query returning zero or one entry
    pub async fn find(&self, query: &Query, attributes: &[&str]) -> DirectoryResult<Option<DirectoryEntry>> {
        self.execute(Operation::Find { query, attributes }).await
    }

    /// Replace a single attribute
    pub async fn modify(&self, dn: &str, attribute: &str, value: &str) -> DirectoryResult<()> {
        self.execute(Operation::Modify {
            dn,
            attribute,
            value,
        })
        .await
        .map(|_| ())
    }

    /// Create an entry
    pub async fn add(&self, entry: &DirectoryEntry) -> DirectoryResult<()> {
        self.execute(Operation::Add { entry }).await.map(|_| ())
    }

    /// Close the current connection, if any
    pub async fn disconnect(&self) {
        let mut slot = self.connection.lock().await;
        if let Some(mut active) = slot.take() {
            active.conn.close().await;
        }
        self.lock_pool().release();
    }

    async fn execute(&self, op: Operation<'_>) -> DirectoryResult<Option<DirectoryEntry>> {
        // A write with no writable endpoint known would only burn a full
        // failover cycle before failing
        if op.is_write() && !self.has_writable() {
            warn!(operation = op.name(), "No writable directory endpoint known");
            return Err(DirectoryError::ReadOnly);
        }

        let mut slot = self.connection.lock().await;
        let attempts = self.lock_pool().len() + 1;
        let mut connects = self.lock_pool().len();

        for _ in 0..attempts {
            if slot.is_none() {
                // The master may have gone down earlier in this call
                if op.is_write() && !self.has_writable() {
                    warn!(operation = op.name(), "Writable directory endpoint lost, not retrying write");
                    return Err(DirectoryError::ReadOnly);
                }
                *slot = Some(self.open(&mut connects).await?);
            }
            let Some(active) = slot.as_mut() else {
                continue;
            };

            match op.run(active.conn.as_mut()).await {
                Ok(result) => return Ok(result),
                Err(ConnectionError::ReadOnly(reason)) => {
                    if active.member.role == EndpointRole::ReadWrite {
                        error!(
                            address = %active.member.address,
                            operation = op.name(),
                            reason = %reason,
                            "Read-write directory endpoint is read-only"
                        );
                        self.lock_pool().mark_read_only_rejected(active.member.index);
                        return Err(DirectoryError::ReadOnly);
                    }

                    warn!(
                        address = %active.member.address,
                        operation = op.name(),
                        "Directory replica refused a write, moving on"
                    );
                    if let Some(mut stale) = slot.take() {
                        stale.conn.close().await;
                    }
                    self.lock_pool().release();
                }
                Err(ConnectionError::Rejected { code, message }) => {
                    debug!(
                        address = %active.member.address,
                        operation = op.name(),
                        code,
                        message = %message,
                        "Directory rejected operation"
                    );
                    return Err(DirectoryError::Rejected { code, message });
                }
                Err(ConnectionError::Transport(reason)) => {
                    error!(
                        address = %active.member.address,
                        operation = op.name(),
                        reason = %reason,
                        "Directory operation failed"
                    );
                    let index = active.member.index;
                    if let Some(mut failed) = slot.take() {
                        failed.conn.close().await;
                    }
                    {
                        let mut pool = self.lock_pool();
                        pool.mark_crashed(index);
                        pool.release();
                    }
                }
            }
        }

        error!(operation = op.name(), "Directory retry budget exhausted");
        Err(DirectoryError::Unavailable)
    }

    /// Connect to the next available endpoint
    ///
    /// Spends at most `connects` connection attempts, shared across the
    /// whole operation, even when a short cooldown lets failed members
    /// rejoin the rotation.
    async fn open(&self, connects: &mut usize) -> DirectoryResult<ActiveConnection> {
        loop {
            let selection = self.lock_pool().next();
            let member = match selection {
                Ok(member) => member,
                Err(e) => {
                    error!("All directory endpoints are down");
                    return Err(e);
                }
            };

            if *connects == 0 {
                self.lock_pool().release();
                error!(address = %member.address, "Directory connect attempts exhausted");
                return Err(DirectoryError::Unavailable);
            }
            *connects -= 1;

            debug!(address = %member.address, "Connecting to directory endpoint");
            match self.connector.connect(&member.address).await {
                Ok(conn) => {
                    self.lock_pool().mark_healthy(member.index);
                    info!(address = %member.address, role = ?member.role, "Connected to directory endpoint");
                    return Ok(ActiveConnection { member, conn });
                }
                Err(e) => {
                    error!(address = %member.address, error = %e, "Connection to directory endpoint failed");
                }
            }
        }
    }
}

impl std::fmt::Debug for DirectoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryClient")
            .field("pool", &*self.lock_pool())
            .finish()
    }
}
