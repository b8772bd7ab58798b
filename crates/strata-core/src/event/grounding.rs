//! Grounding, frames, and supersession descriptors.
//!
//! These are the typed sub-structures an [`Event`](super::Event) carries
//! to justify itself: which events it cites and how ([`Grounding`]),
//! the interpretive context that makes a claim falsifiable ([`Frame`]),
//! and the marker that replaces another event's standing without
//! touching its existence ([`Supersession`]).

use serde::{Deserialize, Serialize};

use super::EventId;
use super::types::{ReferenceKind, SupersessionKind};

/// A single typed citation of another event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingRef {
    /// Id of the cited event.
    pub event_id: EventId,
    /// How the citation relates the two events.
    pub kind: ReferenceKind,
}

impl GroundingRef {
    /// Convenience constructor.
    #[must_use]
    pub fn new(event_id: impl Into<EventId>, kind: ReferenceKind) -> Self {
        Self {
            event_id: event_id.into(),
            kind,
        }
    }
}

/// Descriptor of the computation that produced a derived value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Derivation {
    /// Names of the operators applied, outermost first (e.g. `sum`,
    /// `group_by`).
    pub operators: Vec<String>,

    /// Ids of the events the computation consumed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<EventId>,

    /// Optional free-text description of the computation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// The justification an event cites for itself.
///
/// Optional on `given` events, required on `meant` and `derived_value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grounding {
    /// Typed references to other events.
    pub references: Vec<GroundingRef>,

    /// Present on derived values: what computation produced this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation: Option<Derivation>,
}

impl Grounding {
    /// Grounding with references only (no derivation).
    #[must_use]
    pub const fn from_references(references: Vec<GroundingRef>) -> Self {
        Self {
            references,
            derivation: None,
        }
    }

    /// Returns `true` if any reference has the given kind.
    #[must_use]
    pub fn has_kind(&self, kind: ReferenceKind) -> bool {
        self.references.iter().any(|r| r.kind == kind)
    }
}

/// The interpretive context of a `meant` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// The claim being made.
    pub claim: String,

    /// Confidence or standing of the claim (e.g. `tentative`,
    /// `established`).
    pub epistemic_status: String,

    /// Known limits of the claim.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caveats: Vec<String>,

    /// Why the claim was made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

/// Marker that this event replaces another's interpretation.
///
/// The target remains in the log and queryable forever; only its
/// standing as the active interpretation changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supersession {
    /// The event whose standing is replaced.
    pub supersedes: EventId,

    /// Why the replacement happened.
    pub kind: SupersessionKind,

    /// Optional free-text rationale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
