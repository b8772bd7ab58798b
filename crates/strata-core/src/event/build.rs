//! Fail-fast factory helpers for well-formed events.
//!
//! These constructors validate at build time and return the first
//! problem they find, unlike [`crate::store::EventStore::append`], which
//! collects every violation into a list. The split is deliberate: a
//! malformed construction here is a programmer error; a bad event
//! arriving at the store is a runtime data condition the caller may
//! want to skip past.
//!
//! The returned events are drafts: `parents` is empty (push onto it
//! before appending when causal edges matter) and `logical_clock` is
//! unassigned until the store commits.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use crate::error::BuildError;
use crate::hash::mint_event_id;

use super::grounding::{Derivation, Frame, Grounding, GroundingRef};
use super::types::{Category, EpistemicType, ReferenceKind};
use super::{Event, EventId};

// Process-local sequence so two events minted in the same microsecond by
// the same actor still get distinct ids.
static MINT_SEQ: AtomicU64 = AtomicU64::new(0);

fn mint(actor: &str, payload: &serde_json::Value) -> (EventId, chrono::DateTime<Utc>) {
    let now = Utc::now();
    let seq = MINT_SEQ.fetch_add(1, Ordering::Relaxed);
    let id = mint_event_id(
        actor,
        now.timestamp_micros(),
        seq,
        &payload.to_string(),
    );
    (EventId::from(id), now)
}

/// Build a `given` event: raw, externally-sourced fact.
///
/// # Errors
///
/// Returns [`BuildError::EmptyActor`] if `actor` is empty.
pub fn given(
    actor: &str,
    category: Category,
    payload: serde_json::Value,
) -> Result<Event, BuildError> {
    if actor.is_empty() {
        return Err(BuildError::EmptyActor);
    }
    let (id, timestamp) = mint(actor, &payload);
    Ok(Event {
        id,
        epistemic_type: EpistemicType::Given,
        category,
        timestamp,
        actor: actor.to_string(),
        grounding: None,
        frame: None,
        supersession: None,
        payload,
        parents: vec![],
        logical_clock: None,
    })
}

/// Build a `meant` event: an interpretation with its frame and
/// grounding.
///
/// # Errors
///
/// Fails fast on an empty actor, an empty claim, or an empty reference
/// list — a claim without grounding can never commit.
pub fn meant(
    actor: &str,
    frame: Frame,
    references: Vec<GroundingRef>,
    payload: serde_json::Value,
) -> Result<Event, BuildError> {
    if actor.is_empty() {
        return Err(BuildError::EmptyActor);
    }
    if frame.claim.is_empty() {
        return Err(BuildError::EmptyClaim);
    }
    if references.is_empty() {
        return Err(BuildError::NoGrounding);
    }
    let (id, timestamp) = mint(actor, &payload);
    Ok(Event {
        id,
        epistemic_type: EpistemicType::Meant,
        category: Category::Interpretation,
        timestamp,
        actor: actor.to_string(),
        grounding: Some(Grounding::from_references(references)),
        frame: Some(frame),
        supersession: None,
        payload,
        parents: vec![],
        logical_clock: None,
    })
}

/// Build a `derived_value` event: a computed result with its
/// derivation descriptor.
///
/// # Errors
///
/// Fails fast on an empty actor, an empty reference list, a missing
/// `computational`-kind reference, or an empty operator list.
pub fn derived_value(
    actor: &str,
    derivation: Derivation,
    references: Vec<GroundingRef>,
    payload: serde_json::Value,
) -> Result<Event, BuildError> {
    if actor.is_empty() {
        return Err(BuildError::EmptyActor);
    }
    if references.is_empty() {
        return Err(BuildError::NoGrounding);
    }
    if !references.iter().any(|r| r.kind == ReferenceKind::Computational) {
        return Err(BuildError::NoComputationalReference);
    }
    if derivation.operators.is_empty() {
        return Err(BuildError::NoDerivation);
    }
    let (id, timestamp) = mint(actor, &payload);
    Ok(Event {
        id,
        epistemic_type: EpistemicType::DerivedValue,
        category: Category::ComputedValue,
        timestamp,
        actor: actor.to_string(),
        grounding: Some(Grounding {
            references,
            derivation: Some(derivation),
        }),
        frame: None,
        supersession: None,
        payload,
        parents: vec![],
        logical_clock: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_frame() -> Frame {
        Frame {
            claim: "Value looks seasonal".into(),
            epistemic_status: "tentative".into(),
            caveats: vec![],
            purpose: None,
        }
    }

    #[test]
    fn given_mints_unique_ids() {
        let a = given("importer", Category::RawData, json!({"v": 1})).expect("build");
        let b = given("importer", Category::RawData, json!({"v": 1})).expect("build");
        assert_ne!(a.id, b.id);
        assert_eq!(a.epistemic_type, EpistemicType::Given);
        assert!(a.logical_clock.is_none());
    }

    #[test]
    fn given_rejects_empty_actor() {
        assert_eq!(
            given("", Category::RawData, json!(null)).unwrap_err(),
            BuildError::EmptyActor
        );
    }

    #[test]
    fn meant_requires_claim_and_grounding() {
        let refs = vec![GroundingRef::new("ev-1", ReferenceKind::External)];

        let mut frame = sample_frame();
        frame.claim = String::new();
        assert_eq!(
            meant("analyst", frame, refs.clone(), json!({})).unwrap_err(),
            BuildError::EmptyClaim
        );

        assert_eq!(
            meant("analyst", sample_frame(), vec![], json!({})).unwrap_err(),
            BuildError::NoGrounding
        );

        let event = meant("analyst", sample_frame(), refs, json!({})).expect("build");
        assert_eq!(event.epistemic_type, EpistemicType::Meant);
        assert!(event.frame.is_some());
        assert_eq!(event.category, Category::Interpretation);
    }

    #[test]
    fn derived_value_requires_computational_reference() {
        let derivation = Derivation {
            operators: vec!["sum".into()],
            inputs: vec![EventId::from("ev-1")],
            note: None,
        };

        let err = derived_value(
            "calc",
            derivation.clone(),
            vec![GroundingRef::new("ev-1", ReferenceKind::External)],
            json!(42),
        )
        .unwrap_err();
        assert_eq!(err, BuildError::NoComputationalReference);

        let event = derived_value(
            "calc",
            derivation,
            vec![GroundingRef::new("ev-1", ReferenceKind::Computational)],
            json!(42),
        )
        .expect("build");
        assert_eq!(event.epistemic_type, EpistemicType::DerivedValue);
        assert!(
            event
                .grounding
                .as_ref()
                .and_then(|g| g.derivation.as_ref())
                .is_some()
        );
    }

    #[test]
    fn derived_value_requires_operators() {
        let err = derived_value(
            "calc",
            Derivation {
                operators: vec![],
                inputs: vec![],
                note: None,
            },
            vec![GroundingRef::new("ev-1", ReferenceKind::Computational)],
            json!(0),
        )
        .unwrap_err();
        assert_eq!(err, BuildError::NoDerivation);
    }
}
