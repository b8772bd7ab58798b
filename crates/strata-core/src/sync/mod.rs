//! Replica reconciliation: wire protocol, session state machine, and
//! the orchestrating engine.
//!
//! Sync never bypasses store invariants — every received event enters
//! through [`crate::store::EventStore::append`], so replays, rule
//! violations, and out-of-order arrivals are handled exactly as they
//! would be for a local writer.

pub mod engine;
pub mod session;
pub mod wire;

pub use engine::{EngineConfig, EngineStatus, SyncEngine};
pub use session::{InventoryDiff, ReceiveOutcome, SessionState, SyncSession, SyncStats};
pub use wire::{
    ConflictNotice, Inventory, MemoryTransport, Message, PROTOCOL_VERSION, SyncScope,
    SyncTransport,
};
