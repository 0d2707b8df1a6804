use std::time::{Duration, SystemTime};

use crate::member::Change;

/// Protocol and ring occurrences, delivered to the router and every listener.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum EventKind {
    /// A batch of membership changes was applied by the gossip protocol.
    MembershipChangesApplied { changes: Vec<Change> },
    /// The adaptive piggyback count changed.
    MaxPAdjusted { old_p_count: i64, new_p_count: i64 },
    JoinReceived { source: String },
    JoinCompleted { duration: Duration, joined: Vec<String> },
    PingSent { target: String },
    PingReceived { source: String },
    /// Indirect ping requests were fanned out to `peers` on behalf of `target`.
    PingRequestsSent { target: String, peers: Vec<String> },
    PingRequestReceived { source: String, target: String },
    PingRequestPing { target: String, duration: Duration },
    RingChecksumComputed { old_checksum: u64, new_checksum: u64 },
    RingChanged {
        servers_added: Vec<String>,
        servers_removed: Vec<String>,
    },
    /// An occurrence this coordinator has no specific handling for.
    Other { name: String },
}

impl EventKind {
    pub fn name(&self) -> &str {
        match self {
            Self::MembershipChangesApplied { .. } => "membership-changes-applied",
            Self::MaxPAdjusted { .. } => "max-p-adjusted",
            Self::JoinReceived { .. } => "join-received",
            Self::JoinCompleted { .. } => "join-completed",
            Self::PingSent { .. } => "ping-sent",
            Self::PingReceived { .. } => "ping-received",
            Self::PingRequestsSent { .. } => "ping-requests-sent",
            Self::PingRequestReceived { .. } => "ping-request-received",
            Self::PingRequestPing { .. } => "ping-request-ping",
            Self::RingChecksumComputed { .. } => "ring-checksum-computed",
            Self::RingChanged { .. } => "ring-changed",
            Self::Other { name } => name,
        }
    }
}

/// Immutable, timestamped record of one occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub timestamp: SystemTime,
    pub kind: EventKind,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            timestamp: SystemTime::now(),
            kind,
        }
    }

    pub fn changes(changes: Vec<Change>) -> Self {
        Self::new(EventKind::MembershipChangesApplied { changes })
    }
}

impl From<EventKind> for Event {
    fn from(kind: EventKind) -> Self {
        Self::new(kind)
    }
}
