//! strata-core: a local-first, event-sourced epistemic data substrate.
//!
//! Every state change is an immutable, causally-ordered entry in an
//! append-only log; all derived state is a view over that log. The
//! crate has two tightly coupled halves:
//!
//! - the **event store** ([`store`]): append validation, epistemic
//!   rules, causal parking, supersession-without-erasure, and indexed
//!   lookups over committed state;
//! - the **sync protocol** ([`sync`]): bloom-filter inventory exchange,
//!   causal-order conflict detection, bounded retry, and durable
//!   failure recording between two divergent replicas.
//!
//! Supporting primitives: the rolling hash ([`hash`]), the inventory
//! bloom filter ([`bloom`]), and the vector clock ([`clock`]).
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums; `append` is lenient and
//!   returns violation lists, the [`event::build`] factories fail fast.
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `debug!`).
//! - **Ownership**: one store per workspace, passed explicitly; no
//!   process-wide instances.

pub mod bloom;
pub mod clock;
pub mod error;
pub mod event;
pub mod hash;
pub mod store;
pub mod sync;

pub use bloom::BloomFilter;
pub use clock::{CausalRelation, VectorClock};
pub use error::{BuildError, RuleCode, SessionError, StoreError, Violation, ViolationKind};
pub use event::{Event, EventId};
pub use store::{AppendOutcome, EventStore, Receipt};
pub use sync::{SyncEngine, SyncSession};
