//! Grounding verification: proving a claim traces to ground truth.
//!
//! The verifier walks an event's grounding references looking for at
//! least one path that terminates in a `given` event. The walk is
//! iterative with an explicit stack and a visited set, so a large or
//! malformed reference graph can neither blow the call stack nor loop.
//!
//! Semantics:
//!
//! - `given` events are grounded trivially.
//! - Success is a logical OR across references: one terminating path is
//!   enough. Extra groundings raise confidence but are not required.
//! - Unresolved ids are skipped, not errors — a reference may point at
//!   an event that is still in transit (causal parking).
//! - A revisited id marks the walk as circular; the error is reported
//!   only when no other path grounds the event.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::event::{EpistemicType, Event, EventId};

/// Why a verification did not find a grounding path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroundingFailure {
    /// The reference graph revisited an event already on the walk.
    Circular,
    /// No reference path terminates in a `given` event.
    NoPath {
        /// References that could not be resolved (possible forward
        /// references still in transit).
        unresolved: usize,
    },
}

impl std::fmt::Display for GroundingFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Circular => f.write_str("circular grounding"),
            Self::NoPath { unresolved: 0 } => {
                f.write_str("no grounding path terminates in a given event")
            }
            Self::NoPath { unresolved } => write!(
                f,
                "no grounding path terminates in a given event ({unresolved} unresolved)"
            ),
        }
    }
}

/// Result of verifying one event's grounding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    /// Whether at least one reference path reached a `given` event.
    pub grounded: bool,
    /// The winning path, from the verified event down to the `given`
    /// terminus. Empty when not grounded.
    pub chain: Vec<EventId>,
    /// Present when not grounded.
    pub failure: Option<GroundingFailure>,
}

impl Verification {
    fn grounded_via(chain: Vec<EventId>) -> Self {
        Self {
            grounded: true,
            chain,
            failure: None,
        }
    }

    fn failed(failure: GroundingFailure) -> Self {
        Self {
            grounded: false,
            chain: vec![],
            failure: Some(failure),
        }
    }

    /// True when the only obstacle was unresolved forward references.
    /// The store retries such events when promoting parked arrivals.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.failure,
            Some(GroundingFailure::NoPath { unresolved }) if unresolved > 0
        )
    }
}

/// Verify that `event` traces to ground truth through `resolve`.
///
/// `resolve` looks up committed events by id; returning `None` marks
/// the id as unresolved (skipped, never an error by itself).
pub fn verify<F>(event: &Event, resolve: F) -> Verification
where
    F: Fn(&EventId) -> Option<Arc<Event>>,
{
    if event.epistemic_type == EpistemicType::Given {
        return Verification::grounded_via(vec![event.id.clone()]);
    }

    let references = event
        .grounding
        .as_ref()
        .map(|g| g.references.as_slice())
        .unwrap_or_default();
    if references.is_empty() {
        return Verification::failed(GroundingFailure::NoPath { unresolved: 0 });
    }

    let mut stack: Vec<EventId> = Vec::new();
    let mut came_from: HashMap<EventId, EventId> = HashMap::new();
    let mut visited: HashSet<EventId> = HashSet::new();
    let mut cycle_seen = false;
    let mut unresolved = 0_usize;

    visited.insert(event.id.clone());
    for reference in references.iter().rev() {
        came_from.insert(reference.event_id.clone(), event.id.clone());
        stack.push(reference.event_id.clone());
    }

    while let Some(id) = stack.pop() {
        if visited.contains(&id) {
            cycle_seen = true;
            continue;
        }
        visited.insert(id.clone());

        let Some(current) = resolve(&id) else {
            unresolved += 1;
            continue;
        };

        if current.epistemic_type == EpistemicType::Given {
            return Verification::grounded_via(rebuild_chain(&came_from, &event.id, &id));
        }

        let next_refs = current
            .grounding
            .as_ref()
            .map(|g| g.references.as_slice())
            .unwrap_or_default();
        for reference in next_refs.iter().rev() {
            came_from
                .entry(reference.event_id.clone())
                .or_insert_with(|| id.clone());
            stack.push(reference.event_id.clone());
        }
    }

    if cycle_seen {
        Verification::failed(GroundingFailure::Circular)
    } else {
        Verification::failed(GroundingFailure::NoPath { unresolved })
    }
}

/// Rebuild the path root → terminus from the breadcrumb map.
fn rebuild_chain(
    came_from: &HashMap<EventId, EventId>,
    root: &EventId,
    terminus: &EventId,
) -> Vec<EventId> {
    let mut chain = vec![terminus.clone()];
    let mut cursor = terminus;
    while let Some(prev) = came_from.get(cursor) {
        chain.push(prev.clone());
        if prev == root {
            break;
        }
        cursor = prev;
    }
    chain.reverse();
    chain
}
