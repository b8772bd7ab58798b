//! The append-only event store: log, indices, parking, supersession.
//!
//! All derived state is a view over the log. Writers go through
//! [`EventStore::append`] (lenient, returns structured violations) or
//! [`EventStore::supersede`]; everything else on the surface is a pure
//! query over committed state. Parked events — arrivals whose causal
//! parents are still in transit — are invisible to every query until
//! their dependencies commit.
//!
//! # Append pipeline
//!
//! 1. **Idempotence** — a committed id returns `Duplicate` with no
//!    clock tick and no re-validation.
//! 2. **Structural validation** — required fields, frame presence,
//!    grounding-kind rules; failures come back as a violation list.
//! 3. **Causal readiness** — missing parents (or a missing supersession
//!    target) park the event; parking is an outcome, not an error.
//! 4. **Groundedness** — `meant`/`derived_value` must trace to a
//!    `given` (RULE_7), checked via [`verify`].
//! 5. **Commit** — assign the next logical clock, freeze, index,
//!    notify subscribers, then promote any parked events whose
//!    dependencies are now satisfied (fixed point).

pub mod verify;

use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::CausalRelation;
use crate::error::{StoreError, Violation, ViolationKind};
use crate::event::types::{Category, EpistemicType, ReferenceKind, SupersessionKind};
use crate::event::{Event, EventId, Supersession};

pub use verify::{GroundingFailure, Verification};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// How an append was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receipt {
    /// The event is now part of the log.
    Committed {
        /// Clock value assigned at commit.
        logical_clock: u64,
    },
    /// The id was already committed; nothing changed.
    Duplicate,
    /// The event is held until the listed ids commit.
    Parked {
        /// Ids the event is waiting for.
        waiting_for: Vec<EventId>,
    },
}

/// Successful result of [`EventStore::append`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Id of the appended event.
    pub event_id: EventId,
    /// How the append was settled.
    pub receipt: Receipt,
    /// Previously parked events committed by this append, in commit
    /// order.
    pub promoted: Vec<EventId>,
}

impl AppendOutcome {
    /// Returns `true` if the receipt is `Duplicate`.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self.receipt, Receipt::Duplicate)
    }

    /// Returns `true` if the event was parked.
    #[must_use]
    pub const fn is_parked(&self) -> bool {
        matches!(self.receipt, Receipt::Parked { .. })
    }
}

/// Counters describing the store's current shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Committed events in the log.
    pub committed: usize,
    /// Events held for missing dependencies.
    pub parked: usize,
    /// Current logical clock value.
    pub logical_clock: u64,
}

// ---------------------------------------------------------------------------
// Export / import envelope
// ---------------------------------------------------------------------------

/// Version written into [`LogExport`].
pub const EXPORT_VERSION: u32 = 1;

/// Serializable snapshot of the full log, in commit order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogExport {
    /// Envelope format version.
    pub version: u32,
    /// Clock value at export time.
    pub logical_clock: u64,
    /// Every committed event, in commit order, clocks included.
    pub events: Vec<Event>,
}

/// One rejected row from an import.
#[derive(Debug, Clone)]
pub struct ImportError {
    /// Position in the imported event list.
    pub index: usize,
    /// Id of the rejected event.
    pub event_id: EventId,
    /// Why it was rejected.
    pub error: StoreError,
}

/// Result of replaying an export through `append`.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    /// Events committed (including promotions).
    pub imported: usize,
    /// Events still parked when the replay finished.
    pub parked: usize,
    /// Per-row rejections; a bad row never aborts the rest.
    pub errors: Vec<ImportError>,
}

impl ImportReport {
    /// Returns `true` if every row committed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty() && self.parked == 0
    }
}

// ---------------------------------------------------------------------------
// EventStore
// ---------------------------------------------------------------------------

type Subscriber = Box<dyn Fn(&Event) + Send>;

/// The append-only log and its derived indices.
///
/// Construct one store per workspace and pass references explicitly;
/// there is no process-wide instance. The store is single-writer by
/// design — wrap it in a lock or own it from one task if the host
/// runtime is multi-threaded.
#[derive(Default)]
pub struct EventStore {
    log: Vec<Arc<Event>>,
    by_id: HashMap<EventId, usize>,
    parked: HashMap<EventId, Event>,
    by_type: HashMap<EpistemicType, Vec<EventId>>,
    by_category: HashMap<Category, Vec<EventId>>,
    by_operator: HashMap<String, Vec<EventId>>,
    by_entity: HashMap<String, Vec<EventId>>,
    children: HashMap<EventId, Vec<EventId>>,
    superseded_by: HashMap<EventId, EventId>,
    logical_clock: u64,
    subscribers: Vec<Subscriber>,
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("committed", &self.log.len())
            .field("parked", &self.parked.len())
            .field("logical_clock", &self.logical_clock)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl EventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Write surface
    // -----------------------------------------------------------------------

    /// Append an event to the log.
    ///
    /// See the module docs for the pipeline. Duplicate ids and parked
    /// arrivals are successful outcomes; only validation and rule
    /// failures are errors.
    ///
    /// # Errors
    ///
    /// [`StoreError::Rejected`] with every violation found.
    pub fn append(&mut self, event: Event) -> Result<AppendOutcome, StoreError> {
        if self.by_id.contains_key(&event.id) {
            return Ok(AppendOutcome {
                event_id: event.id,
                receipt: Receipt::Duplicate,
                promoted: vec![],
            });
        }

        let violations = self.validate(&event);
        if !violations.is_empty() {
            return Err(StoreError::Rejected(violations));
        }

        let missing = self.missing_dependencies_of(&event);
        if !missing.is_empty() {
            tracing::debug!(id = %event.id, waiting = ?missing, "parking event");
            let id = event.id.clone();
            self.parked.insert(id.clone(), event);
            return Ok(AppendOutcome {
                event_id: id,
                receipt: Receipt::Parked {
                    waiting_for: missing,
                },
                promoted: vec![],
            });
        }

        if event.epistemic_type.requires_grounding() {
            let verdict = verify::verify(&event, |id| self.get(id));
            if !verdict.grounded {
                let failure = verdict.failure.unwrap_or(GroundingFailure::NoPath {
                    unresolved: 0,
                });
                return Err(StoreError::Rejected(vec![grounding_violation(&failure)]));
            }
        }

        let event_id = event.id.clone();
        let logical_clock = self.commit(event);
        let promoted = self.promote_parked();

        Ok(AppendOutcome {
            event_id,
            receipt: Receipt::Committed { logical_clock },
            promoted,
        })
    }

    /// Append a new interpretation that supersedes `target`.
    ///
    /// The target keeps its place in the log forever; this only changes
    /// which event carries the active interpretation. `event` must be a
    /// draft without a supersession marker of its own and with all
    /// parents already committed.
    ///
    /// # Errors
    ///
    /// - [`StoreError::UnknownEvent`] when `target` was never committed.
    /// - [`StoreError::CannotSupersedeGiven`] when `target` is `given`.
    /// - [`StoreError::UnmetParents`] when the draft's parents are
    ///   missing.
    /// - [`StoreError::Rejected`] when the draft fails validation.
    pub fn supersede(
        &mut self,
        target: &EventId,
        mut event: Event,
        kind: SupersessionKind,
        reason: Option<String>,
    ) -> Result<Arc<Event>, StoreError> {
        let Some(target_event) = self.get(target) else {
            return Err(StoreError::UnknownEvent(target.clone()));
        };
        if target_event.epistemic_type == EpistemicType::Given {
            return Err(StoreError::CannotSupersedeGiven(target.clone()));
        }

        event.supersession = Some(Supersession {
            supersedes: target.clone(),
            kind,
            reason,
        });

        let missing = self.missing_dependencies_of(&event);
        if !missing.is_empty() {
            return Err(StoreError::UnmetParents {
                id: event.id,
                missing,
            });
        }

        let outcome = self.append(event)?;
        self.get(&outcome.event_id)
            .ok_or(StoreError::UnknownEvent(outcome.event_id))
    }

    /// Register a callback invoked synchronously for every commit,
    /// promotions included. A panicking callback is caught and logged;
    /// it never aborts the commit.
    pub fn subscribe(&mut self, callback: impl Fn(&Event) + Send + 'static) {
        self.subscribers.push(Box::new(callback));
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    fn validate(&self, event: &Event) -> Vec<Violation> {
        let mut violations = Vec::new();

        if event.id.is_empty() {
            violations.push(Violation::new(ViolationKind::EmptyId, "event id is empty"));
        }
        if event.actor.is_empty() {
            violations.push(Violation::new(
                ViolationKind::MissingActor,
                "actor is required",
            ));
        }

        match event.epistemic_type {
            EpistemicType::Given => self.check_confabulation(event, &mut violations),
            EpistemicType::Meant => {
                if event.frame.is_none() {
                    violations.push(Violation::new(
                        ViolationKind::MissingFrame,
                        "a meant event requires an interpretive frame",
                    ));
                }
                check_has_references(event, &mut violations);
            }
            EpistemicType::DerivedValue => {
                check_has_references(event, &mut violations);
                let grounding = event.grounding.as_ref();
                if grounding.is_none_or(|g| g.derivation.is_none()) {
                    violations.push(Violation::new(
                        ViolationKind::MissingDerivation,
                        "a derived value requires a derivation descriptor",
                    ));
                }
                if grounding.is_some_and(|g| {
                    !g.references.is_empty() && !g.has_kind(ReferenceKind::Computational)
                }) {
                    violations.push(Violation::new(
                        ViolationKind::MissingComputationalReference,
                        "a derived value requires a computational-kind reference",
                    ));
                }
            }
        }

        // A supersession carried on the wire may target a given; that
        // is checkable as soon as the target is resolvable.
        if let Some(sup) = &event.supersession
            && let Some(target) = self.get(&sup.supersedes)
            && target.epistemic_type == EpistemicType::Given
        {
            violations.push(Violation::new(
                ViolationKind::SupersessionOfGiven,
                format!("event {} is given and cannot be superseded", sup.supersedes),
            ));
        }

        violations
    }

    /// Rule 2: a `given` event must not cite interpretation. Semantic
    /// references are always confabulation; external references are
    /// confabulation when they resolve to a `meant` event.
    fn check_confabulation(&self, event: &Event, violations: &mut Vec<Violation>) {
        let Some(grounding) = &event.grounding else {
            return;
        };
        for reference in &grounding.references {
            match reference.kind {
                ReferenceKind::Semantic => violations.push(Violation::new(
                    ViolationKind::ConfabulatedReference,
                    format!(
                        "given event cites {} with semantic kind",
                        reference.event_id
                    ),
                )),
                ReferenceKind::External => {
                    if self
                        .get(&reference.event_id)
                        .is_some_and(|t| t.epistemic_type == EpistemicType::Meant)
                    {
                        violations.push(Violation::new(
                            ViolationKind::ConfabulatedReference,
                            format!(
                                "given event cites meant event {} as external",
                                reference.event_id
                            ),
                        ));
                    }
                }
                ReferenceKind::Structural
                | ReferenceKind::Computational
                | ReferenceKind::Epistemic => {}
            }
        }
    }

    // -----------------------------------------------------------------------
    // Commit and promotion
    // -----------------------------------------------------------------------

    /// Dependency ids (parents plus any supersession target) not yet
    /// committed.
    fn missing_dependencies_of(&self, event: &Event) -> Vec<EventId> {
        let mut missing: Vec<EventId> = event
            .parents
            .iter()
            .filter(|p| !self.by_id.contains_key(*p))
            .cloned()
            .collect();
        if let Some(sup) = &event.supersession
            && !self.by_id.contains_key(&sup.supersedes)
            && !missing.contains(&sup.supersedes)
        {
            missing.push(sup.supersedes.clone());
        }
        missing
    }

    fn commit(&mut self, mut event: Event) -> u64 {
        self.logical_clock += 1;
        event.logical_clock = Some(self.logical_clock);

        let id = event.id.clone();
        let committed = Arc::new(event);

        self.by_type
            .entry(committed.epistemic_type)
            .or_default()
            .push(id.clone());
        self.by_category
            .entry(committed.category.clone())
            .or_default()
            .push(id.clone());
        if let Some(derivation) = committed
            .grounding
            .as_ref()
            .and_then(|g| g.derivation.as_ref())
        {
            for operator in &derivation.operators {
                self.by_operator
                    .entry(operator.clone())
                    .or_default()
                    .push(id.clone());
            }
        }
        if let Some(entity) = extract_entity(&committed.payload) {
            self.by_entity
                .entry(entity.to_string())
                .or_default()
                .push(id.clone());
        }
        for parent in &committed.parents {
            self.children
                .entry(parent.clone())
                .or_default()
                .push(id.clone());
        }
        if let Some(sup) = &committed.supersession {
            self.superseded_by
                .insert(sup.supersedes.clone(), id.clone());
        }

        self.by_id.insert(id.clone(), self.log.len());
        self.log.push(Arc::clone(&committed));

        tracing::debug!(id = %id, clock = self.logical_clock, "committed event");
        self.notify(&committed);

        self.logical_clock
    }

    fn notify(&self, event: &Arc<Event>) {
        for subscriber in &self.subscribers {
            if catch_unwind(AssertUnwindSafe(|| subscriber(event))).is_err() {
                tracing::warn!(id = %event.id, "subscriber panicked during notification");
            }
        }
    }

    /// Promote parked events whose dependencies are satisfied, repeating
    /// until a pass promotes nothing.
    fn promote_parked(&mut self) -> Vec<EventId> {
        let mut promoted = Vec::new();
        loop {
            let ready: Vec<EventId> = self
                .parked
                .iter()
                .filter(|(_, event)| self.missing_dependencies_of(event).is_empty())
                .map(|(id, _)| id.clone())
                .collect();
            if ready.is_empty() {
                break;
            }

            let mut advanced = false;
            for id in ready {
                let Some(event) = self.parked.remove(&id) else {
                    continue;
                };
                // Rules that need a resolvable target (supersession of a
                // given, confabulated external references) become
                // checkable once the dependencies exist. Events are
                // immutable, so a violation found now is permanent.
                let violations = self.validate(&event);
                if !violations.is_empty() {
                    tracing::warn!(
                        id = %id,
                        count = violations.len(),
                        "dropping parked event invalidated by its resolved dependencies"
                    );
                    continue;
                }
                if event.epistemic_type.requires_grounding() {
                    let verdict = verify::verify(&event, |eid| self.get(eid));
                    if !verdict.grounded {
                        if verdict.is_retryable() {
                            // Its grounds may still be in transit; keep
                            // holding it.
                            self.parked.insert(id, event);
                        } else {
                            tracing::warn!(
                                id = %id,
                                failure = %verdict.failure.unwrap_or(GroundingFailure::NoPath { unresolved: 0 }),
                                "dropping parked event that can never ground"
                            );
                        }
                        continue;
                    }
                }
                self.commit(event);
                promoted.push(id);
                advanced = true;
            }

            if !advanced {
                break;
            }
        }
        promoted
    }

    // -----------------------------------------------------------------------
    // Query surface (pure)
    // -----------------------------------------------------------------------

    /// Look up a committed event. Parked events are not visible.
    #[must_use]
    pub fn get(&self, id: &EventId) -> Option<Arc<Event>> {
        self.by_id.get(id).map(|&idx| Arc::clone(&self.log[idx]))
    }

    /// Returns `true` if `id` is committed.
    #[must_use]
    pub fn contains(&self, id: &EventId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Every committed event, in commit order.
    #[must_use]
    pub fn get_all(&self) -> Vec<Arc<Event>> {
        self.log.clone()
    }

    /// Committed events of one epistemic type, in commit order.
    #[must_use]
    pub fn get_by_epistemic_type(&self, epistemic_type: EpistemicType) -> Vec<Arc<Event>> {
        self.collect_ids(self.by_type.get(&epistemic_type))
    }

    /// All `given` events.
    #[must_use]
    pub fn get_given(&self) -> Vec<Arc<Event>> {
        self.get_by_epistemic_type(EpistemicType::Given)
    }

    /// All `meant` events, superseded ones included.
    #[must_use]
    pub fn get_meant(&self) -> Vec<Arc<Event>> {
        self.get_by_epistemic_type(EpistemicType::Meant)
    }

    /// Committed events carrying the given category tag.
    #[must_use]
    pub fn get_by_category(&self, category: &Category) -> Vec<Arc<Event>> {
        self.collect_ids(self.by_category.get(category))
    }

    /// Derived values produced by the named operator.
    #[must_use]
    pub fn get_by_operator(&self, operator: &str) -> Vec<Arc<Event>> {
        self.collect_ids(self.by_operator.get(operator))
    }

    /// Events whose payload declares the given entity id.
    #[must_use]
    pub fn get_by_entity(&self, entity: &str) -> Vec<Arc<Event>> {
        self.collect_ids(self.by_entity.get(entity))
    }

    /// Direct grounding references of `id`, bucketed by reference kind.
    /// Unresolvable references are skipped.
    #[must_use]
    pub fn what_grounds(&self, id: &EventId) -> HashMap<ReferenceKind, Vec<Arc<Event>>> {
        let mut buckets: HashMap<ReferenceKind, Vec<Arc<Event>>> = HashMap::new();
        if let Some(event) = self.get(id)
            && let Some(grounding) = &event.grounding
        {
            for reference in &grounding.references {
                if let Some(target) = self.get(&reference.event_id) {
                    buckets.entry(reference.kind).or_default().push(target);
                }
            }
        }
        buckets
    }

    /// Walk the grounding graph from `id`, depth-first, up to
    /// `max_depth` hops. The starting event is included; cycles are cut
    /// by a visited set.
    #[must_use]
    pub fn provenance_chain(&self, id: &EventId, max_depth: usize) -> Vec<Arc<Event>> {
        let mut chain = Vec::new();
        let mut visited: HashSet<EventId> = HashSet::new();
        let mut stack: Vec<(EventId, usize)> = vec![(id.clone(), 0)];

        while let Some((current_id, depth)) = stack.pop() {
            if !visited.insert(current_id.clone()) {
                continue;
            }
            let Some(event) = self.get(&current_id) else {
                continue;
            };
            chain.push(Arc::clone(&event));
            if depth >= max_depth {
                continue;
            }
            if let Some(grounding) = &event.grounding {
                for reference in grounding.references.iter().rev() {
                    stack.push((reference.event_id.clone(), depth + 1));
                }
            }
        }
        chain
    }

    /// The `given` events the grounding graph of `id` terminates in.
    #[must_use]
    pub fn find_roots(&self, id: &EventId) -> Vec<Arc<Event>> {
        self.provenance_chain(id, usize::MAX)
            .into_iter()
            .filter(|e| e.epistemic_type == EpistemicType::Given)
            .collect()
    }

    /// Whether `id` could be recomputed from its recorded derivation.
    #[must_use]
    pub fn can_recompute(&self, id: &EventId) -> bool {
        self.get(id).is_some_and(|e| {
            e.epistemic_type == EpistemicType::DerivedValue
                && e.grounding
                    .as_ref()
                    .is_some_and(|g| g.derivation.is_some())
        })
    }

    /// Whether another event supersedes `id`.
    #[must_use]
    pub fn is_superseded(&self, id: &EventId) -> bool {
        self.superseded_by.contains_key(id)
    }

    /// The event superseding `id`, if any.
    #[must_use]
    pub fn superseding_event(&self, id: &EventId) -> Option<Arc<Event>> {
        self.superseded_by.get(id).and_then(|sid| self.get(sid))
    }

    /// `meant` events that are not superseded — the active
    /// interpretations.
    #[must_use]
    pub fn active_meant(&self) -> Vec<Arc<Event>> {
        self.get_meant()
            .into_iter()
            .filter(|e| !self.is_superseded(&e.id))
            .collect()
    }

    /// Committed children of `id` (events listing it as a parent).
    #[must_use]
    pub fn children_of(&self, id: &EventId) -> Vec<EventId> {
        self.children.get(id).cloned().unwrap_or_default()
    }

    /// Ids of committed events no other committed event lists as a
    /// parent — the current tips of the DAG.
    #[must_use]
    pub fn heads(&self) -> Vec<EventId> {
        self.log
            .iter()
            .map(|e| e.id.clone())
            .filter(|id| self.children.get(id).is_none_or(Vec::is_empty))
            .collect()
    }

    /// Ids of committed events with no parents.
    #[must_use]
    pub fn root_events(&self) -> Vec<EventId> {
        self.log
            .iter()
            .filter(|e| e.parents.is_empty())
            .map(|e| e.id.clone())
            .collect()
    }

    /// Causal relation between two committed events via the parents
    /// DAG. This is the baseline strategy the sync conflict detector
    /// uses; [`crate::clock::VectorClock::compare`] answers with the
    /// same vocabulary for clock-carrying replicas.
    #[must_use]
    pub fn causal_relation(&self, a: &EventId, b: &EventId) -> CausalRelation {
        if a == b {
            return CausalRelation::Equal;
        }
        if self.is_ancestor(a, b) {
            return CausalRelation::Before;
        }
        if self.is_ancestor(b, a) {
            return CausalRelation::After;
        }
        CausalRelation::Concurrent
    }

    /// Returns `true` if `ancestor` is reachable from `descendant` by
    /// walking parent links upward.
    #[must_use]
    pub fn is_ancestor(&self, ancestor: &EventId, descendant: &EventId) -> bool {
        let Some(start) = self.get(descendant) else {
            return false;
        };
        let mut stack: Vec<EventId> = start.parents.clone();
        let mut visited: HashSet<EventId> = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == *ancestor {
                return true;
            }
            if !visited.insert(id.clone()) {
                continue;
            }
            if let Some(event) = self.get(&id) {
                stack.extend(event.parents.iter().cloned());
            }
        }
        false
    }

    /// Ids currently parked.
    #[must_use]
    pub fn parked_ids(&self) -> Vec<EventId> {
        self.parked.keys().cloned().collect()
    }

    /// Returns `true` if `id` is held in the parked map.
    #[must_use]
    pub fn is_parked(&self, id: &EventId) -> bool {
        self.parked.contains_key(id)
    }

    /// Deduplicated ids that parked events are waiting for — what a
    /// sync peer should be asked to send next.
    #[must_use]
    pub fn missing_dependencies(&self) -> Vec<EventId> {
        let mut missing: Vec<EventId> = self
            .parked
            .values()
            .flat_map(|e| self.missing_dependencies_of(e))
            .collect();
        missing.sort_unstable();
        missing.dedup();
        missing
    }

    /// Current shape of the store.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            committed: self.log.len(),
            parked: self.parked.len(),
            logical_clock: self.logical_clock,
        }
    }

    fn collect_ids(&self, ids: Option<&Vec<EventId>>) -> Vec<Arc<Event>> {
        ids.map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Persistence boundary
    // -----------------------------------------------------------------------

    /// Snapshot the committed log for an external storage collaborator.
    #[must_use]
    pub fn export(&self) -> LogExport {
        LogExport {
            version: EXPORT_VERSION,
            logical_clock: self.logical_clock,
            events: self.log.iter().map(|e| e.as_ref().clone()).collect(),
        }
    }

    /// Replay an export through the full append pipeline.
    ///
    /// Each event is re-validated; a corrupt or rule-violating row is
    /// recorded and skipped, never fatal to the rest. Incoming clock
    /// values are discarded — this store assigns its own.
    pub fn import(&mut self, data: LogExport) -> ImportReport {
        let mut report = ImportReport::default();
        for (index, mut event) in data.events.into_iter().enumerate() {
            event.logical_clock = None;
            let event_id = event.id.clone();
            match self.append(event) {
                Ok(outcome) => {
                    if matches!(outcome.receipt, Receipt::Committed { .. }) {
                        report.imported += 1;
                    }
                    report.imported += outcome.promoted.len();
                }
                Err(error) => {
                    tracing::warn!(id = %event_id, %error, "import row rejected");
                    report.errors.push(ImportError {
                        index,
                        event_id,
                        error,
                    });
                }
            }
        }
        report.parked = self.parked.len();
        report
    }
}

/// Invariant 3 precondition: `meant`/`derived_value` must cite at least
/// one reference before the chain walk is worth attempting.
fn check_has_references(event: &Event, violations: &mut Vec<Violation>) {
    let has_refs = event
        .grounding
        .as_ref()
        .is_some_and(|g| !g.references.is_empty());
    if !has_refs {
        violations.push(Violation::new(
            ViolationKind::MissingGrounding,
            format!(
                "{} events require at least one grounding reference",
                event.epistemic_type
            ),
        ));
    }
}

/// Best-effort entity id extraction from an opaque payload.
fn extract_entity(payload: &serde_json::Value) -> Option<&str> {
    ["entity", "entity_id", "entityId"]
        .iter()
        .find_map(|key| payload.get(key).and_then(serde_json::Value::as_str))
}

fn grounding_violation(failure: &GroundingFailure) -> Violation {
    let kind = match failure {
        GroundingFailure::Circular => ViolationKind::CircularGrounding,
        GroundingFailure::NoPath { .. } => ViolationKind::UngroundedChain,
    };
    Violation::new(kind, failure.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::grounding::{Derivation, Frame, Grounding, GroundingRef};
    use crate::event::{build, Event};
    use serde_json::json;
    use std::sync::{Arc as SharedArc, Mutex};

    fn given(payload: serde_json::Value) -> Event {
        build::given("test", Category::RawData, payload).expect("build given")
    }

    fn meant_on(target: &EventId) -> Event {
        build::meant(
            "analyst",
            Frame {
                claim: "interpretation".into(),
                epistemic_status: "tentative".into(),
                caveats: vec![],
                purpose: None,
            },
            vec![GroundingRef::new(target.as_str(), ReferenceKind::External)],
            json!({}),
        )
        .expect("build meant")
    }

    fn committed_clock(outcome: &AppendOutcome) -> u64 {
        match outcome.receipt {
            Receipt::Committed { logical_clock } => logical_clock,
            ref other => panic!("expected commit, got {other:?}"),
        }
    }

    #[test]
    fn append_assigns_increasing_clocks() {
        let mut store = EventStore::new();
        let c1 = committed_clock(&store.append(given(json!({"n": 1}))).expect("append"));
        let c2 = committed_clock(&store.append(given(json!({"n": 2}))).expect("append"));
        assert!(c2 > c1);
        assert_eq!(store.stats().committed, 2);
    }

    #[test]
    fn duplicate_append_is_silent_and_clock_free() {
        let mut store = EventStore::new();
        let event = given(json!({}));
        store.append(event.clone()).expect("first append");
        let before = store.stats().logical_clock;

        let outcome = store.append(event).expect("duplicate append");
        assert!(outcome.is_duplicate());
        assert_eq!(store.stats().logical_clock, before);
        assert_eq!(store.stats().committed, 1);
    }

    #[test]
    fn meant_without_frame_is_rejected_with_violations() {
        let mut store = EventStore::new();
        let g = given(json!({}));
        let g_id = g.id.clone();
        store.append(g).expect("append given");

        let mut bad = meant_on(&g_id);
        bad.frame = None;
        let err = store.append(bad).unwrap_err();
        let StoreError::Rejected(violations) = err else {
            panic!("expected rejection");
        };
        assert!(
            violations
                .iter()
                .any(|v| v.kind == ViolationKind::MissingFrame)
        );
    }

    #[test]
    fn given_with_semantic_reference_is_confabulation() {
        let mut store = EventStore::new();
        let g = given(json!({}));
        let g_id = g.id.clone();
        store.append(g).expect("append");

        let mut confabulated = given(json!({}));
        confabulated.grounding = Some(Grounding::from_references(vec![GroundingRef::new(
            g_id.as_str(),
            ReferenceKind::Semantic,
        )]));
        let err = store.append(confabulated).unwrap_err();
        let StoreError::Rejected(violations) = err else {
            panic!("expected rejection");
        };
        assert_eq!(violations[0].kind, ViolationKind::ConfabulatedReference);
        assert_eq!(violations[0].kind.rule().map(|r| r.code()), Some("RULE_2"));
    }

    #[test]
    fn given_external_reference_to_meant_is_confabulation() {
        let mut store = EventStore::new();
        let g = given(json!({}));
        let g_id = g.id.clone();
        store.append(g).expect("append");
        let m = meant_on(&g_id);
        let m_id = m.id.clone();
        store.append(m).expect("append meant");

        let mut confabulated = given(json!({}));
        confabulated.grounding = Some(Grounding::from_references(vec![GroundingRef::new(
            m_id.as_str(),
            ReferenceKind::External,
        )]));
        assert!(store.append(confabulated).is_err());
    }

    #[test]
    fn ungrounded_meant_is_a_rule_7_rejection() {
        let mut store = EventStore::new();
        let mut orphan = meant_on(&EventId::from("ev-never"));
        // The reference is unresolved and nothing parks it (no parents),
        // so the chain cannot terminate.
        orphan.parents.clear();
        let err = store.append(orphan).unwrap_err();
        let StoreError::Rejected(violations) = err else {
            panic!("expected rejection");
        };
        assert_eq!(violations[0].kind.rule().map(|r| r.code()), Some("RULE_7"));
    }

    #[test]
    fn parking_waits_for_parents_then_promotes() {
        let mut store = EventStore::new();
        let parent = given(json!({"n": 1}));
        let parent_id = parent.id.clone();

        let mut child = given(json!({"n": 2}));
        child.parents = vec![parent_id.clone()];
        let child_id = child.id.clone();

        let outcome = store.append(child).expect("park");
        assert_eq!(
            outcome.receipt,
            Receipt::Parked {
                waiting_for: vec![parent_id.clone()]
            }
        );
        assert!(store.get(&child_id).is_none(), "parked is not committed");

        let outcome = store.append(parent).expect("append parent");
        assert_eq!(outcome.promoted, vec![child_id.clone()]);

        let parent_clock = store.get(&parent_id).expect("parent").logical_clock;
        let child_clock = store.get(&child_id).expect("child").logical_clock;
        assert!(child_clock > parent_clock);
    }

    #[test]
    fn promotion_cascades_through_chains() {
        let mut store = EventStore::new();
        let a = given(json!({"n": "a"}));
        let mut b = given(json!({"n": "b"}));
        let mut c = given(json!({"n": "c"}));
        b.parents = vec![a.id.clone()];
        c.parents = vec![b.id.clone()];
        let (b_id, c_id) = (b.id.clone(), c.id.clone());

        store.append(c).expect("park c");
        store.append(b).expect("park b");
        let outcome = store.append(a).expect("append a");
        assert_eq!(outcome.promoted, vec![b_id, c_id]);
        assert_eq!(store.stats().parked, 0);
    }

    #[test]
    fn reappending_parked_id_reports_parked_again() {
        let mut store = EventStore::new();
        let mut child = given(json!({}));
        child.parents = vec![EventId::from("ev-gone")];

        let first = store.append(child.clone()).expect("park");
        let second = store.append(child).expect("park again");
        assert!(first.is_parked());
        assert!(second.is_parked());
        assert_eq!(store.stats().parked, 1);
    }

    #[test]
    fn supersession_keeps_target_queryable() {
        let mut store = EventStore::new();
        let g = given(json!({}));
        let g_id = g.id.clone();
        store.append(g).expect("append");
        let m = meant_on(&g_id);
        let m_id = m.id.clone();
        store.append(m).expect("append");

        let replacement = meant_on(&g_id);
        let new_event = store
            .supersede(&m_id, replacement, SupersessionKind::Correction, None)
            .expect("supersede");

        assert!(store.is_superseded(&m_id));
        assert_eq!(
            store.superseding_event(&m_id).expect("superseding").id,
            new_event.id
        );
        assert!(store.get(&m_id).is_some(), "target never erased");

        let active: Vec<EventId> = store.active_meant().iter().map(|e| e.id.clone()).collect();
        assert!(active.contains(&new_event.id));
        assert!(!active.contains(&m_id));
    }

    #[test]
    fn supersession_of_given_fails_without_append() {
        let mut store = EventStore::new();
        let g = given(json!({}));
        let g_id = g.id.clone();
        store.append(g).expect("append");
        let size_before = store.stats().committed;

        let replacement = meant_on(&g_id);
        let err = store
            .supersede(&g_id, replacement, SupersessionKind::Correction, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::CannotSupersedeGiven(_)));
        assert_eq!(store.stats().committed, size_before);
    }

    #[test]
    fn supersession_of_unknown_target_fails() {
        let mut store = EventStore::new();
        let g = given(json!({}));
        let g_id = g.id.clone();
        store.append(g).expect("append");

        let err = store
            .supersede(
                &EventId::from("ev-ghost"),
                meant_on(&g_id),
                SupersessionKind::Refinement,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownEvent(_)));
    }

    #[test]
    fn wire_supersession_of_given_is_rejected_by_append() {
        let mut store = EventStore::new();
        let g = given(json!({}));
        let g_id = g.id.clone();
        store.append(g).expect("append");

        let mut incoming = meant_on(&g_id);
        incoming.supersession = Some(Supersession {
            supersedes: g_id,
            kind: SupersessionKind::Correction,
            reason: None,
        });
        let err = store.append(incoming).unwrap_err();
        let StoreError::Rejected(violations) = err else {
            panic!("expected rejection");
        };
        assert_eq!(violations[0].kind, ViolationKind::SupersessionOfGiven);
    }

    #[test]
    fn parked_wire_supersession_of_given_is_dropped_on_promotion() {
        let mut store = EventStore::new();
        let target = given(json!({}));
        let target_id = target.id.clone();

        // Arrives before its target, so the target's epistemic type is
        // unknown and the event parks instead of failing.
        let mut incoming = meant_on(&target_id);
        incoming.supersession = Some(Supersession {
            supersedes: target_id.clone(),
            kind: SupersessionKind::Correction,
            reason: None,
        });
        let incoming_id = incoming.id.clone();
        assert!(store.append(incoming).expect("park").is_parked());

        let outcome = store.append(target).expect("append target");
        assert!(outcome.promoted.is_empty(), "rule 9 caught at promotion");
        assert!(store.get(&incoming_id).is_none());
        assert!(!store.is_superseded(&target_id));
        assert_eq!(store.stats().parked, 0);
    }

    #[test]
    fn parked_given_citing_meant_is_dropped_on_promotion() {
        let mut store = EventStore::new();
        let g = given(json!({}));
        let g_id = g.id.clone();
        store.append(g).expect("append");
        let m = meant_on(&g_id);
        let m_id = m.id.clone();

        // The external reference is unresolvable at append time; the
        // parent link parks the event until the meant commits, at which
        // point the citation is confabulation.
        let mut citing = given(json!({}));
        citing.parents = vec![m_id.clone()];
        citing.grounding = Some(Grounding::from_references(vec![GroundingRef::new(
            m_id.as_str(),
            ReferenceKind::External,
        )]));
        let citing_id = citing.id.clone();
        assert!(store.append(citing).expect("park").is_parked());

        let outcome = store.append(m).expect("append meant");
        assert!(outcome.promoted.is_empty());
        assert!(store.get(&citing_id).is_none());
        assert_eq!(store.stats().parked, 0);
    }

    #[test]
    fn indices_cover_type_category_operator_entity() {
        let mut store = EventStore::new();
        let g = given(json!({"entity": "acct-7"}));
        let g_id = g.id.clone();
        store.append(g).expect("append");

        let derived = build::derived_value(
            "calc",
            Derivation {
                operators: vec!["sum".into()],
                inputs: vec![g_id.clone()],
                note: None,
            },
            vec![GroundingRef::new(g_id.as_str(), ReferenceKind::Computational)],
            json!({"entity": "acct-7", "total": 12}),
        )
        .expect("build");
        let d_id = derived.id.clone();
        store.append(derived).expect("append");

        assert_eq!(store.get_by_category(&Category::RawData).len(), 1);
        assert_eq!(store.get_by_operator("sum")[0].id, d_id);
        assert_eq!(store.get_by_entity("acct-7").len(), 2);
        assert_eq!(store.get_given().len(), 1);
        assert!(store.can_recompute(&d_id));
        assert!(!store.can_recompute(&g_id));
    }

    #[test]
    fn what_grounds_buckets_by_kind() {
        let mut store = EventStore::new();
        let g = given(json!({}));
        let g_id = g.id.clone();
        store.append(g).expect("append");

        let m = build::meant(
            "analyst",
            Frame {
                claim: "c".into(),
                epistemic_status: "tentative".into(),
                caveats: vec![],
                purpose: None,
            },
            vec![
                GroundingRef::new(g_id.as_str(), ReferenceKind::External),
                GroundingRef::new(g_id.as_str(), ReferenceKind::Structural),
            ],
            json!({}),
        )
        .expect("build");
        let m_id = m.id.clone();
        store.append(m).expect("append");

        let buckets = store.what_grounds(&m_id);
        assert_eq!(buckets[&ReferenceKind::External].len(), 1);
        assert_eq!(buckets[&ReferenceKind::Structural].len(), 1);
        assert!(!buckets.contains_key(&ReferenceKind::Semantic));
    }

    #[test]
    fn provenance_terminates_in_given_roots() {
        let mut store = EventStore::new();
        let g = given(json!({}));
        let g_id = g.id.clone();
        store.append(g).expect("append");
        let m1 = meant_on(&g_id);
        let m1_id = m1.id.clone();
        store.append(m1).expect("append");

        let m2 = build::meant(
            "analyst",
            Frame {
                claim: "second order".into(),
                epistemic_status: "tentative".into(),
                caveats: vec![],
                purpose: None,
            },
            vec![GroundingRef::new(m1_id.as_str(), ReferenceKind::Epistemic)],
            json!({}),
        )
        .expect("build");
        let m2_id = m2.id.clone();
        store.append(m2).expect("append");

        let chain = store.provenance_chain(&m2_id, 16);
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].id, m2_id);

        let roots = store.find_roots(&m2_id);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].id, g_id);
    }

    #[test]
    fn provenance_respects_max_depth() {
        let mut store = EventStore::new();
        let g = given(json!({}));
        let g_id = g.id.clone();
        store.append(g).expect("append");
        let m = meant_on(&g_id);
        let m_id = m.id.clone();
        store.append(m).expect("append");

        assert_eq!(store.provenance_chain(&m_id, 0).len(), 1);
        assert_eq!(store.provenance_chain(&m_id, 1).len(), 2);
    }

    #[test]
    fn heads_and_roots_track_the_dag() {
        let mut store = EventStore::new();
        let a = given(json!({"n": "a"}));
        let a_id = a.id.clone();
        store.append(a).expect("append");

        let mut b = given(json!({"n": "b"}));
        b.parents = vec![a_id.clone()];
        let b_id = b.id.clone();
        store.append(b).expect("append");

        assert_eq!(store.heads(), vec![b_id.clone()]);
        assert_eq!(store.root_events(), vec![a_id.clone()]);
        assert_eq!(store.children_of(&a_id), vec![b_id]);
    }

    #[test]
    fn causal_relation_over_parent_links() {
        let mut store = EventStore::new();
        let a = given(json!({"n": "a"}));
        let a_id = a.id.clone();
        store.append(a).expect("append");

        let mut b = given(json!({"n": "b"}));
        b.parents = vec![a_id.clone()];
        let b_id = b.id.clone();
        store.append(b).expect("append");

        let mut c = given(json!({"n": "c"}));
        c.parents = vec![a_id.clone()];
        let c_id = c.id.clone();
        store.append(c).expect("append");

        assert_eq!(store.causal_relation(&a_id, &b_id), CausalRelation::Before);
        assert_eq!(store.causal_relation(&b_id, &a_id), CausalRelation::After);
        assert_eq!(
            store.causal_relation(&b_id, &c_id),
            CausalRelation::Concurrent
        );
        assert_eq!(store.causal_relation(&a_id, &a_id), CausalRelation::Equal);
    }

    #[test]
    fn subscribers_see_commits_and_survive_panics() {
        let mut store = EventStore::new();
        let seen: SharedArc<Mutex<Vec<EventId>>> = SharedArc::default();
        let seen_by_cb = SharedArc::clone(&seen);
        store.subscribe(move |event| {
            seen_by_cb.lock().expect("lock").push(event.id.clone());
        });
        store.subscribe(|_| panic!("misbehaving subscriber"));

        let g = given(json!({}));
        let g_id = g.id.clone();
        store.append(g).expect("append survives subscriber panic");
        assert_eq!(seen.lock().expect("lock").as_slice(), &[g_id]);
    }

    #[test]
    fn export_import_roundtrip_replays_validation() {
        let mut store = EventStore::new();
        let g = given(json!({}));
        let g_id = g.id.clone();
        store.append(g).expect("append");
        store.append(meant_on(&g_id)).expect("append");

        let export = store.export();
        assert_eq!(export.version, EXPORT_VERSION);
        assert_eq!(export.events.len(), 2);
        assert!(export.events.iter().all(|e| e.logical_clock.is_some()));

        let mut replica = EventStore::new();
        let report = replica.import(export);
        assert!(report.is_complete());
        assert_eq!(report.imported, 2);
        assert_eq!(replica.stats().committed, 2);
    }

    #[test]
    fn import_skips_bad_rows_and_continues() {
        let mut store = EventStore::new();
        let g = given(json!({}));
        let g_id = g.id.clone();
        store.append(g).expect("append");
        store.append(meant_on(&g_id)).expect("append");
        let mut export = store.export();

        // Corrupt the meant row: strip its frame.
        export.events[1].frame = None;

        let mut replica = EventStore::new();
        let report = replica.import(export);
        assert_eq!(report.imported, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].index, 1);
        assert_eq!(replica.stats().committed, 1);
    }

    #[test]
    fn import_tolerates_out_of_order_rows() {
        let mut store = EventStore::new();
        let a = given(json!({"n": "a"}));
        let a_id = a.id.clone();
        store.append(a).expect("append");
        let mut b = given(json!({"n": "b"}));
        b.parents = vec![a_id];
        store.append(b).expect("append");

        let mut export = store.export();
        export.events.reverse();

        let mut replica = EventStore::new();
        let report = replica.import(export);
        assert!(report.is_complete(), "parked row promoted by later row");
        assert_eq!(replica.stats().committed, 2);
    }
}
