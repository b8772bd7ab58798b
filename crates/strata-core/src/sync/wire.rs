//! Sync wire protocol: message shapes and the transport abstraction.
//!
//! The protocol is transport-agnostic: anything implementing
//! [`SyncTransport`] can carry a session (HTTP, sockets, a file
//! handoff). Messages are JSON-serializable with an external `type` tag
//! so a peer can dispatch before parsing the body.

use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bloom::BloomFilter;
use crate::event::{Event, EventId};

/// Version of the wire protocol spoken by this crate.
pub const PROTOCOL_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// What a session negotiates up front: which slice of the log is being
/// reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncScope {
    /// Workspace under reconciliation. Incoming events declaring a
    /// different workspace are rejected by the receiver.
    pub workspace: String,

    /// Frames the initiator cares about (advisory; empty means all).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frames: Vec<String>,

    /// Perspective horizon under which the initiator operates
    /// (advisory; enforced by an external gate, not this core).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizon: Option<String>,

    /// Wire protocol version.
    pub protocol_version: u32,
}

impl SyncScope {
    /// Scope covering one workspace with no frame or horizon filters.
    #[must_use]
    pub fn workspace(name: impl Into<String>) -> Self {
        Self {
            workspace: name.into(),
            frames: vec![],
            horizon: None,
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// A replica's summary of what it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    /// Ids of events with no local children — the DAG tips.
    pub heads: Vec<EventId>,
    /// Number of committed events.
    pub count: usize,
    /// Bloom summary over all committed event ids.
    pub bloom: BloomFilter,
}

/// A detected causal-order conflict: two children of one parent with no
/// ancestor/descendant relation between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictNotice {
    /// The already-committed local child.
    pub local: EventId,
    /// The incoming remote child.
    pub remote: EventId,
    /// The parent both children extend.
    pub common_parent: EventId,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Session opener: the initiator's negotiated scope.
    #[serde(rename = "SCOPE")]
    Scope(SyncScope),

    /// The responder accepts the scope.
    #[serde(rename = "SCOPE_ACK")]
    ScopeAck,

    /// Bloom-filter inventory exchange.
    #[serde(rename = "INV")]
    Inv(Inventory),

    /// Ids the sender holds and believes the receiver lacks.
    #[serde(rename = "HAVE")]
    Have {
        /// Candidate ids (probabilistic, from the peer's bloom).
        ids: Vec<EventId>,
    },

    /// Ids the sender wants transferred.
    #[serde(rename = "WANT")]
    Want {
        /// Requested ids.
        ids: Vec<EventId>,
    },

    /// Full events, exactly the requested ids, every field preserved.
    #[serde(rename = "SEND")]
    Send {
        /// Transferred events in the sender's commit order.
        events: Vec<Event>,
    },

    /// Phase/terminal acknowledgement.
    #[serde(rename = "ACK")]
    Ack,

    /// The responder declines the session.
    #[serde(rename = "REFUSE")]
    Refuse {
        /// Why the session was declined.
        reason: String,
    },

    /// Notification of a detected concurrent-edit conflict.
    #[serde(rename = "CONFLICT")]
    Conflict(ConflictNotice),
}

impl Message {
    /// The wire tag, for logs and error reporting.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Scope(_) => "SCOPE",
            Self::ScopeAck => "SCOPE_ACK",
            Self::Inv(_) => "INV",
            Self::Have { .. } => "HAVE",
            Self::Want { .. } => "WANT",
            Self::Send { .. } => "SEND",
            Self::Ack => "ACK",
            Self::Refuse { .. } => "REFUSE",
            Self::Conflict(_) => "CONFLICT",
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Abstraction over the wire.
///
/// Implementations shuttle [`Message`]s between two replicas. Higher
/// concerns (framing, compression, authentication) are layered outside
/// this trait.
pub trait SyncTransport {
    /// Error type for transport operations.
    type Error: std::fmt::Debug + std::fmt::Display;

    /// Deliver a message to the peer.
    fn send(&mut self, message: Message) -> Result<(), Self::Error>;

    /// Block until the peer's next message arrives.
    fn recv(&mut self) -> Result<Message, Self::Error>;
}

// ---------------------------------------------------------------------------
// In-memory transport (tests and local pairing)
// ---------------------------------------------------------------------------

/// Error from the in-memory transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryTransportError {
    /// The peer hung up.
    #[error("peer disconnected")]
    Disconnected,
    /// No message arrived within the wait budget.
    #[error("timed out waiting for peer")]
    TimedOut,
}

/// A channel-backed duplex transport: what one side sends, the other
/// receives. Create both ends with [`MemoryTransport::pair`] and hand
/// one to each replica (typically on separate threads).
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Sender<Message>,
    rx: Receiver<Message>,
    wait: Duration,
}

impl MemoryTransport {
    /// Create two connected transports.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = channel();
        let (b_tx, a_rx) = channel();
        let wait = Duration::from_secs(5);
        (
            Self {
                tx: a_tx,
                rx: a_rx,
                wait,
            },
            Self {
                tx: b_tx,
                rx: b_rx,
                wait,
            },
        )
    }
}

impl SyncTransport for MemoryTransport {
    type Error = MemoryTransportError;

    fn send(&mut self, message: Message) -> Result<(), Self::Error> {
        self.tx
            .send(message)
            .map_err(|_| MemoryTransportError::Disconnected)
    }

    fn recv(&mut self) -> Result<Message, Self::Error> {
        self.rx.recv_timeout(self.wait).map_err(|e| match e {
            RecvTimeoutError::Timeout => MemoryTransportError::TimedOut,
            RecvTimeoutError::Disconnected => MemoryTransportError::Disconnected,
        })
    }
}

/// A transport that always fails. Exercises the engine's retry and
/// durable-failure paths without a network.
#[derive(Debug, Default)]
pub struct FailingTransport {
    /// Number of send/recv calls attempted.
    pub calls: usize,
}

/// Error produced by [`FailingTransport`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transport unreachable")]
pub struct Unreachable;

impl SyncTransport for FailingTransport {
    type Error = Unreachable;

    fn send(&mut self, _message: Message) -> Result<(), Self::Error> {
        self.calls += 1;
        Err(Unreachable)
    }

    fn recv(&mut self) -> Result<Message, Self::Error> {
        self.calls += 1;
        Err(Unreachable)
    }
}
