//! One reconciliation exchange between two stores.
//!
//! A [`SyncSession`] owns the negotiated scope, the state machine, and
//! the running statistics of a single exchange. It reads and writes the
//! local [`EventStore`] only through the store's public surface —
//! appends stay idempotent and rule-checked, so replayed or duplicate
//! transfers are harmless.
//!
//! State machine: `Idle → Negotiating → Syncing → Complete | Failed`.
//! The driver loops in [`crate::sync::engine`] move a session through
//! these states from either end of the wire; the session itself never
//! touches a transport.

use chrono::{DateTime, Utc};

use crate::clock::CausalRelation;
use crate::error::SessionError;
use crate::event::{Event, EventId};
use crate::store::EventStore;

use super::wire::{ConflictNotice, Inventory, Message, SyncScope};

// ---------------------------------------------------------------------------
// State and stats
// ---------------------------------------------------------------------------

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing exchanged yet.
    Idle,
    /// Scope sent or accepted; inventories may flow.
    Negotiating,
    /// Event transfer in progress.
    Syncing,
    /// Terminal: finished cleanly.
    Complete,
    /// Terminal: aborted with an error.
    Failed,
}

impl SessionState {
    const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Negotiating => "negotiating",
            Self::Syncing => "syncing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

/// Cumulative statistics for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
    /// Events shipped to the peer.
    pub sent: usize,
    /// Events accepted from the peer (committed or parked).
    pub received: usize,
    /// Conflicts recorded while processing received events.
    pub conflicts: usize,
    /// Events refused (out of scope or rule-violating).
    pub rejected: usize,
    /// When the session left `Idle`.
    pub started_at: Option<DateTime<Utc>>,
    /// When the session reached a terminal state.
    pub ended_at: Option<DateTime<Utc>>,
    /// Present when the session failed.
    pub error: Option<String>,
}

/// What to pull and what to push, computed from a peer's inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryDiff {
    /// Remote heads missing locally — a definite want-list.
    pub to_receive: Vec<EventId>,
    /// Local events the remote bloom says it definitely lacks. The
    /// filter has no false negatives, so nothing the remote already
    /// holds is ever offered; a rare false positive leaves an id for
    /// the follow-up rounds or the next session.
    pub to_send: Vec<EventId>,
}

/// Result of processing one `SEND` batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveOutcome {
    /// Events accepted (committed or parked).
    pub accepted: usize,
    /// Events refused.
    pub rejected: usize,
    /// Conflicts detected in this batch.
    pub conflicts: Vec<ConflictNotice>,
}

// ---------------------------------------------------------------------------
// SyncSession
// ---------------------------------------------------------------------------

/// A single reconciliation exchange.
#[derive(Debug)]
pub struct SyncSession {
    scope: SyncScope,
    state: SessionState,
    stats: SyncStats,
    conflicts: Vec<ConflictNotice>,
}

impl SyncSession {
    /// Create an idle session with the given scope.
    #[must_use]
    pub const fn new(scope: SyncScope) -> Self {
        Self {
            scope,
            state: SessionState::Idle,
            stats: SyncStats {
                sent: 0,
                received: 0,
                conflicts: 0,
                rejected: 0,
                started_at: None,
                ended_at: None,
                error: None,
            },
            conflicts: Vec::new(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// The negotiated scope.
    #[must_use]
    pub const fn scope(&self) -> &SyncScope {
        &self.scope
    }

    /// Conflicts recorded so far.
    #[must_use]
    pub fn conflicts(&self) -> &[ConflictNotice] {
        &self.conflicts
    }

    /// Begin as the initiator: transition to `Negotiating` and produce
    /// the `SCOPE` opener.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidTransition`] unless the session is idle.
    pub fn start(&mut self) -> Result<Message, SessionError> {
        self.transition(SessionState::Idle, SessionState::Negotiating, "start")?;
        Ok(Message::Scope(self.scope.clone()))
    }

    /// Begin as the responder: adopt the initiator's scope and produce
    /// `SCOPE_ACK`, or `REFUSE` when the scope cannot be served.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidTransition`] unless the session is idle.
    pub fn accept(&mut self, offered: &SyncScope) -> Result<Message, SessionError> {
        self.transition(SessionState::Idle, SessionState::Negotiating, "accept")?;
        if offered.protocol_version != self.scope.protocol_version {
            let reason = format!(
                "protocol version {} unsupported",
                offered.protocol_version
            );
            self.state = SessionState::Failed;
            self.stats.error = Some(reason.clone());
            return Ok(Message::Refuse { reason });
        }
        if offered.workspace != self.scope.workspace {
            let reason = format!("workspace '{}' not served here", offered.workspace);
            self.state = SessionState::Failed;
            self.stats.error = Some(reason.clone());
            return Ok(Message::Refuse { reason });
        }
        Ok(Message::ScopeAck)
    }

    /// Summarise the local store into an `INV` message.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidTransition`] outside `Negotiating`.
    pub fn create_inventory(&self, store: &EventStore) -> Result<Message, SessionError> {
        if self.state != SessionState::Negotiating {
            return Err(SessionError::InvalidTransition {
                from: self.state.name(),
                attempted: "create_inventory",
            });
        }
        let mut bloom = crate::bloom::BloomFilter::new();
        let all = store.get_all();
        for event in &all {
            bloom.add(event.id.as_str());
        }
        Ok(Message::Inv(Inventory {
            heads: store.heads(),
            count: all.len(),
            bloom,
        }))
    }

    /// Digest the peer's inventory; transitions to `Syncing`.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidTransition`] outside `Negotiating`.
    pub fn process_inventory(
        &mut self,
        store: &EventStore,
        remote: &Inventory,
    ) -> Result<InventoryDiff, SessionError> {
        self.transition(
            SessionState::Negotiating,
            SessionState::Syncing,
            "process_inventory",
        )?;

        let to_receive: Vec<EventId> = remote
            .heads
            .iter()
            .filter(|id| !store.contains(id) && !store.is_parked(id))
            .cloned()
            .collect();

        // Commit order, so grounding targets precede their dependents
        // on the wire.
        let to_send: Vec<EventId> = store
            .get_all()
            .iter()
            .filter(|e| !remote.bloom.might_contain(e.id.as_str()))
            .map(|e| e.id.clone())
            .collect();

        tracing::debug!(
            workspace = %self.scope.workspace,
            want = to_receive.len(),
            send = to_send.len(),
            remote_count = remote.count,
            "inventories diffed"
        );

        Ok(InventoryDiff {
            to_receive,
            to_send,
        })
    }

    /// Build a `SEND` for exactly the requested ids.
    ///
    /// Every field is preserved as committed — in particular the actor
    /// identity is never rewritten in transit. The store-local
    /// `logical_clock` is stripped; the receiving store assigns its
    /// own. Unknown ids are skipped.
    #[must_use]
    pub fn create_send(&mut self, store: &EventStore, ids: &[EventId]) -> Message {
        let mut events: Vec<Event> = ids
            .iter()
            .filter_map(|id| store.get(id))
            .map(|arc| {
                let mut event = arc.as_ref().clone();
                event.logical_clock = None;
                event
            })
            .collect();
        events.sort_by_key(|e| store.get(&e.id).and_then(|a| a.logical_clock));
        self.stats.sent += events.len();
        Message::Send { events }
    }

    /// Process an incoming `SEND` batch: scope-check, detect conflicts,
    /// and append each event through the store's full pipeline.
    ///
    /// Conflicts are surfaced and recorded, never resolved silently —
    /// both sides of a conflict stay in the log.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidTransition`] outside `Syncing`.
    pub fn process_received(
        &mut self,
        store: &mut EventStore,
        events: Vec<Event>,
    ) -> Result<ReceiveOutcome, SessionError> {
        if self.state != SessionState::Syncing {
            return Err(SessionError::InvalidTransition {
                from: self.state.name(),
                attempted: "process_received",
            });
        }

        let mut outcome = ReceiveOutcome {
            accepted: 0,
            rejected: 0,
            conflicts: vec![],
        };

        for event in events {
            if let Some(declared) = event.declared_workspace()
                && declared != self.scope.workspace
            {
                tracing::warn!(
                    id = %event.id,
                    declared,
                    scope = %self.scope.workspace,
                    "rejecting out-of-scope event"
                );
                outcome.rejected += 1;
                continue;
            }

            let conflicts = detect_conflicts(store, &event);
            match store.append(event) {
                Ok(receipt) => {
                    if !receipt.is_duplicate() {
                        outcome.accepted += 1;
                    }
                    for conflict in conflicts {
                        tracing::info!(
                            local = %conflict.local,
                            remote = %conflict.remote,
                            parent = %conflict.common_parent,
                            "concurrent children of one parent"
                        );
                        outcome.conflicts.push(conflict);
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "peer event rejected by store");
                    outcome.rejected += 1;
                }
            }
        }

        self.stats.received += outcome.accepted;
        self.stats.rejected += outcome.rejected;
        self.stats.conflicts += outcome.conflicts.len();
        self.conflicts.extend(outcome.conflicts.iter().cloned());
        Ok(outcome)
    }

    /// Record a conflict reported by the peer.
    pub fn record_remote_conflict(&mut self, conflict: ConflictNotice) {
        self.stats.conflicts += 1;
        self.conflicts.push(conflict);
    }

    /// Terminal transition: finished cleanly. Returns the cumulative
    /// stats.
    pub fn complete(&mut self) -> SyncStats {
        self.state = SessionState::Complete;
        self.stats.ended_at = Some(Utc::now());
        self.stats.clone()
    }

    /// Terminal transition: aborted. Returns the cumulative stats with
    /// the error recorded.
    pub fn fail(&mut self, error: impl Into<String>) -> SyncStats {
        self.state = SessionState::Failed;
        self.stats.error = Some(error.into());
        self.stats.ended_at = Some(Utc::now());
        self.stats.clone()
    }

    fn transition(
        &mut self,
        expected: SessionState,
        next: SessionState,
        attempted: &'static str,
    ) -> Result<(), SessionError> {
        if self.state != expected {
            return Err(SessionError::InvalidTransition {
                from: self.state.name(),
                attempted,
            });
        }
        if self.stats.started_at.is_none() {
            self.stats.started_at = Some(Utc::now());
        }
        self.state = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Conflict detection
// ---------------------------------------------------------------------------

/// Find local events that share a parent with `incoming` without being
/// causally related to it.
///
/// The baseline detector works purely on parent links: for each parent
/// the incoming event declares, every committed child of that parent is
/// compared; a pair with no ancestor/descendant relation in either
/// direction is a conflict.
fn detect_conflicts(store: &EventStore, incoming: &Event) -> Vec<ConflictNotice> {
    let mut conflicts = Vec::new();
    if store.contains(&incoming.id) {
        // A replay cannot introduce a new concurrent edit.
        return conflicts;
    }
    for parent in &incoming.parents {
        for local_child in store.children_of(parent) {
            if local_child == incoming.id {
                continue;
            }
            if relation_to_incoming(store, &local_child, incoming) == CausalRelation::Concurrent {
                conflicts.push(ConflictNotice {
                    local: local_child,
                    remote: incoming.id.clone(),
                    common_parent: parent.clone(),
                });
            }
        }
    }
    conflicts
}

/// Causal relation between a committed event and one still in transit.
///
/// The incoming event is not in the store, so it cannot be an ancestor
/// of anything committed; the only orderings possible are `local`
/// preceding `incoming` (local is reachable from the incoming parents)
/// or concurrency.
fn relation_to_incoming(store: &EventStore, local: &EventId, incoming: &Event) -> CausalRelation {
    if *local == incoming.id {
        return CausalRelation::Equal;
    }
    let reaches_local = incoming
        .parents
        .iter()
        .any(|p| p == local || store.is_ancestor(local, p));
    if reaches_local {
        CausalRelation::Before
    } else {
        CausalRelation::Concurrent
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
