//! Error types and machine-readable rule codes.
//!
//! Two deliberately different failure styles coexist at the public
//! boundary, both expressed as `Result`:
//!
//! - **Lenient**: [`crate::store::EventStore::append`] returns every
//!   problem it found as a [`Violation`] list inside
//!   [`StoreError::Rejected`], so bulk imports can continue past
//!   individual bad events.
//! - **Fail-fast**: the factory builders in [`crate::event::build`]
//!   return a [`BuildError`] on the first malformed input, because a
//!   malformed construction is a programmer error rather than a runtime
//!   data condition.

use std::fmt;

use crate::event::EventId;

// ---------------------------------------------------------------------------
// RuleCode
// ---------------------------------------------------------------------------

/// Machine-readable codes for the epistemic rules enforced by the store.
///
/// Rules 4–6 of the original catalog govern layers outside this core
/// (rendering, perspective gating) and have no counterpart here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleCode {
    /// Epistemic types form a closed, mutually exclusive set.
    Rule1,
    /// A `given` event must not be grounded in interpretation.
    Rule2,
    /// Events are never deleted or rewritten.
    Rule3,
    /// Interpretations must trace to at least one `given` event.
    Rule7,
    /// Derived values must carry a computational derivation.
    Rule8,
    /// Supersession replaces standing, never existence; `given` cannot
    /// be superseded.
    Rule9,
}

impl RuleCode {
    /// Stable code identifier (`RULE_#`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Rule1 => "RULE_1",
            Self::Rule2 => "RULE_2",
            Self::Rule3 => "RULE_3",
            Self::Rule7 => "RULE_7",
            Self::Rule8 => "RULE_8",
            Self::Rule9 => "RULE_9",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Rule1 => "Unknown or invalid epistemic type",
            Self::Rule2 => "Given events cannot be grounded in interpretation",
            Self::Rule3 => "Events are immutable and never deleted",
            Self::Rule7 => "Interpretation does not trace to ground truth",
            Self::Rule8 => "Derived value lacks a computational derivation",
            Self::Rule9 => "Given events cannot be superseded",
        }
    }

    /// Optional remediation hint for operators and upstream tools.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::Rule1 => Some("Use one of: given, meant, derived_value."),
            Self::Rule2 => {
                Some("Remove semantic references and external references to meant events.")
            }
            Self::Rule3 => Some("Append a tombstone or supersession event instead."),
            Self::Rule7 => {
                Some("Add at least one grounding reference that terminates in a given event.")
            }
            Self::Rule8 => {
                Some("Include a derivation descriptor and a computational-kind reference.")
            }
            Self::Rule9 => Some("Supersede the interpretation built on the given, not the given."),
        }
    }
}

impl fmt::Display for RuleCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ---------------------------------------------------------------------------
// Violation
// ---------------------------------------------------------------------------

/// Category of a single append-time validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    /// The `actor` field is empty.
    MissingActor,
    /// The event id is empty.
    EmptyId,
    /// A `meant` event is missing its interpretive frame.
    MissingFrame,
    /// A `meant` or `derived_value` event has no grounding references.
    MissingGrounding,
    /// A `given` event cites a `semantic` reference, or an `external`
    /// reference that resolves to a `meant` event.
    ConfabulatedReference,
    /// A `derived_value` event has no derivation descriptor.
    MissingDerivation,
    /// A `derived_value` event has no `computational`-kind reference.
    MissingComputationalReference,
    /// No grounding path terminates in a `given` event.
    UngroundedChain,
    /// The grounding graph revisits an event already on the walk.
    CircularGrounding,
    /// A supersession targets a `given` event.
    SupersessionOfGiven,
}

impl ViolationKind {
    /// The epistemic rule this violation is tagged with, if any.
    ///
    /// Purely structural failures (empty actor, empty id) carry no rule.
    #[must_use]
    pub const fn rule(&self) -> Option<RuleCode> {
        match self {
            Self::MissingActor | Self::EmptyId | Self::MissingFrame => None,
            Self::ConfabulatedReference => Some(RuleCode::Rule2),
            Self::MissingGrounding | Self::UngroundedChain | Self::CircularGrounding => {
                Some(RuleCode::Rule7)
            }
            Self::MissingDerivation | Self::MissingComputationalReference => {
                Some(RuleCode::Rule8)
            }
            Self::SupersessionOfGiven => Some(RuleCode::Rule9),
        }
    }
}

/// A single structured validation failure from `append`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// The category of failure.
    pub kind: ViolationKind,
    /// Human-readable description of what went wrong.
    pub message: String,
}

impl Violation {
    pub(crate) fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind.rule() {
            Some(rule) => write!(f, "[{rule}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Errors returned by the lenient store surface.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The event failed validation; every problem found is listed.
    #[error("event rejected: {}", format_violations(.0))]
    Rejected(Vec<Violation>),

    /// A supersession referenced an event the store has never committed.
    #[error("unknown event {0}")]
    UnknownEvent(EventId),

    /// A supersession targeted a `given` event.
    #[error("cannot supersede given event {0}")]
    CannotSupersedeGiven(EventId),

    /// A supersession's parents are not yet committed. Superseding
    /// interpretations must build on committed state.
    #[error("supersession of {id} has unmet parents: {missing:?}")]
    UnmetParents {
        /// Id of the superseding event.
        id: EventId,
        /// Parent ids not yet committed.
        missing: Vec<EventId>,
    },
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// BuildError
// ---------------------------------------------------------------------------

/// Fail-fast errors from the event factory builders.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// The actor string is empty.
    #[error("actor must not be empty")]
    EmptyActor,

    /// A `meant` builder was given an empty claim.
    #[error("a meant event requires a non-empty claim")]
    EmptyClaim,

    /// A `meant` or `derived_value` builder received no grounding
    /// references.
    #[error("at least one grounding reference is required")]
    NoGrounding,

    /// A `derived_value` builder received no computational reference.
    #[error("a derived value requires a computational-kind reference")]
    NoComputationalReference,

    /// A `derived_value` builder received no derivation descriptor.
    #[error("a derived value requires a derivation descriptor")]
    NoDerivation,
}

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

/// Errors raised by the sync session state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// A phase method was called while the session was in the wrong
    /// state.
    #[error("invalid session transition: {from} -> {attempted}")]
    InvalidTransition {
        /// State the session was in.
        from: &'static str,
        /// Phase that was attempted.
        attempted: &'static str,
    },

    /// The remote refused the negotiated scope.
    #[error("remote refused sync: {0}")]
    Refused(String),

    /// The remote sent a message the current phase cannot accept.
    #[error("unexpected message in phase {phase}: {got}")]
    UnexpectedMessage {
        /// Phase that was executing.
        phase: &'static str,
        /// Wire tag of the offending message.
        got: &'static str,
    },
}
