//! Event data model for the strata log.
//!
//! An [`Event`] is the atomic, immutable unit of the append-only log.
//! Its wire shape is plain JSON:
//!
//! ```text
//! {id, epistemic_type, category, timestamp, actor,
//!  grounding?, frame?, supersession?, payload, parents?}
//! ```
//!
//! `logical_clock` is assigned by the local store at commit time; it is
//! never required on the wire but is present on export.

pub mod build;
pub mod grounding;
pub mod types;

pub use build::{derived_value, given, meant};
pub use grounding::{Derivation, Frame, Grounding, GroundingRef, Supersession};
pub use types::{
    Category, EpistemicType, ReferenceKind, SupersessionKind, UnknownEpistemicType,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// EventId
// ---------------------------------------------------------------------------

/// Globally unique event identifier, assigned at creation and never
/// reused.
///
/// Ids minted by this crate have an `ev-<hex>` shape (see
/// [`crate::hash::mint_event_id`]); ids minted elsewhere are accepted
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// View the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the id is empty (invalid; rejected on append).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A single event in the strata log.
///
/// Events form a DAG via `parents`, which drives causal-readiness
/// gating in the store: an event whose parents have not all been
/// committed is parked, not rejected. Once committed an event is
/// frozen; the store hands out shared references and nothing mutates a
/// committed event again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique id, assigned at creation.
    pub id: EventId,

    /// Epistemic standing of this event.
    pub epistemic_type: EpistemicType,

    /// Classification tag (e.g. `raw_data`, `interpretation`).
    pub category: Category,

    /// When the event was created.
    pub timestamp: DateTime<Utc>,

    /// Who created the event. Preserved verbatim in sync transfer.
    pub actor: String,

    /// Justification; optional for `given`, required for
    /// `meant`/`derived_value`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding: Option<Grounding>,

    /// Interpretive context; required for `meant`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<Frame>,

    /// Present when this event replaces another's standing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersession: Option<Supersession>,

    /// Opaque application data.
    pub payload: serde_json::Value,

    /// Causal predecessor event ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<EventId>,

    /// Store-assigned total-order position. `None` until committed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_clock: Option<u64>,
}

impl Event {
    /// Returns `true` if this event replaces another's standing.
    #[must_use]
    pub const fn is_supersession(&self) -> bool {
        self.supersession.is_some()
    }

    /// The workspace this event declares in its payload, if any.
    ///
    /// Used by the sync session's scope filter; events without a
    /// declared workspace are in every scope.
    #[must_use]
    pub fn declared_workspace(&self) -> Option<&str> {
        self.payload.get("workspace").and_then(serde_json::Value::as_str)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}",
            self.id, self.epistemic_type, self.category, self.actor
        )?;
        if let Some(clock) = self.logical_clock {
            write!(f, "\t@{clock}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
