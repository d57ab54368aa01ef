//! Accounting session ledger
//!
//! Sessions go through absent -> open -> closed. Interim updates and stops
//! carry cumulative counters; the tracker turns them into per-event deltas
//! and refuses events whose timestamp does not move forward, which protects
//! against duplicated or reordered delivery. State lives in memory only: a
//! restart forgets open sessions, and their later stops are ignored.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tracing::{info, warn};

/// Combine a 32-bit octet counter with its gigaword overflow counter
pub fn combine_octets(gigawords: u32, octets: u32) -> u64 {
    (u64::from(gigawords) << 32) + u64::from(octets)
}

/// Cumulative traffic counters as reported by the NAS
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub in_packets: u64,
    pub out_packets: u64,
    pub in_octets: u64,
    pub out_octets: u64,
}

impl Counters {
    pub fn new(in_packets: u64, out_packets: u64, in_octets: u64, out_octets: u64) -> Self {
        Counters {
            in_packets,
            out_packets,
            in_octets,
            out_octets,
        }
    }

    /// Component-wise difference from an earlier reading
    pub fn since(&self, earlier: &Counters) -> Deltas {
        let diff = |now: u64, before: u64| i128::from(now) - i128::from(before);
        Deltas {
            in_packets: diff(self.in_packets, earlier.in_packets),
            out_packets: diff(self.out_packets, earlier.out_packets),
            in_octets: diff(self.in_octets, earlier.in_octets),
            out_octets: diff(self.out_octets, earlier.out_octets),
        }
    }
}

/// Traffic since the previous accepted event
///
/// Signed: a NAS that resets its counters yields negative deltas, which are
/// reported as is. Wide enough for any pair of 64-bit counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Deltas {
    pub in_packets: i128,
    pub out_packets: i128,
    pub in_octets: i128,
    pub out_octets: i128,
}

/// An open session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountingSession {
    pub session_id: String,
    pub counters: Counters,
    pub last_timestamp: i64,
}

/// Why an event was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Start for a session that is already open
    AlreadyOpen,
    /// Update or stop for a session that is not open
    UnknownSession,
    /// Timestamp not after the last accepted event
    Stale { last: i64, received: i64 },
}

/// Result of applying one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Started,
    Updated(Deltas),
    Stopped(Deltas),
    Ignored(IgnoreReason),
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        !matches!(self, Transition::Ignored(_))
    }

    /// Deltas to report; zero for a start
    pub fn deltas(&self) -> Option<Deltas> {
        match self {
            Transition::Started => Some(Deltas::default()),
            Transition::Updated(deltas) | Transition::Stopped(deltas) => Some(*deltas),
            Transition::Ignored(_) => None,
        }
    }
}

/// Process-wide session ledger
#[derive(Debug, Default)]
pub struct AccountingTracker {
    sessions: DashMap<String, AccountingSession>,
}

impl AccountingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session(&self, session_id: &str) -> Option<AccountingSession> {
        self.sessions.get(session_id).map(|s| s.value().clone())
    }

    /// Open a session with zero counters
    pub fn start(&self, session_id: &str, timestamp: i64) -> Transition {
        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(_) => {
                warn!(session = %session_id, "Received Start after session started");
                Transition::Ignored(IgnoreReason::AlreadyOpen)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(AccountingSession {
                    session_id: session_id.to_string(),
                    counters: Counters::default(),
                    last_timestamp: timestamp,
                });
                info!(session = %session_id, open = self.sessions.len(), "Accounting session started");
                Transition::Started
            }
        }
    }

    /// Apply an interim update
    pub fn update(&self, session_id: &str, timestamp: i64, counters: Counters) -> Transition {
        let Some(mut session) = self.sessions.get_mut(session_id) else {
            warn!(session = %session_id, "Received Interim-Update for an unknown session");
            return Transition::Ignored(IgnoreReason::UnknownSession);
        };

        if timestamp <= session.last_timestamp {
            warn!(
                session = %session_id,
                last = session.last_timestamp,
                received = timestamp,
                "Received an expired Interim-Update"
            );
            return Transition::Ignored(IgnoreReason::Stale {
                last: session.last_timestamp,
                received: timestamp,
            });
        }

        let deltas = counters.since(&session.counters);
        session.counters = counters;
        session.last_timestamp = timestamp;
        Transition::Updated(deltas)
    }

    /// Close a session
    pub fn stop(&self, session_id: &str, timestamp: i64, counters: Counters) -> Transition {
        let transition = match self.sessions.entry(session_id.to_string()) {
            Entry::Vacant(_) => {
                warn!(session = %session_id, "Received Stop for an unknown session");
                return Transition::Ignored(IgnoreReason::UnknownSession);
            }
            Entry::Occupied(occupied) => {
                let last = occupied.get().last_timestamp;
                if timestamp <= last {
                    warn!(session = %session_id, last, received = timestamp, "Received an expired Stop");
                    return Transition::Ignored(IgnoreReason::Stale {
                        last,
                        received: timestamp,
                    });
                }
                let session = occupied.remove();
                Transition::Stopped(counters.since(&session.counters))
            }
        };

        info!(session = %session_id, open = self.sessions.len(), "Accounting session stopped");
        transition
    }
}
