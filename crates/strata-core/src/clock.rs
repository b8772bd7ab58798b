//! Vector clock: per-node counters with a partial-order comparison.
//!
//! The clock is a causal-metadata primitive offered alongside the
//! store's parent-link DAG. Both strategies answer the same question —
//! how two happenings relate causally — and both answer with a
//! [`CausalRelation`], so callers can swap one for the other. The sync
//! session's conflict detector uses the parent-link walk as its
//! baseline; the vector clock is exported for replicas that want
//! causal metadata without materialising the full DAG.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Outcome of comparing two happenings in causal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CausalRelation {
    /// The left side happened strictly before the right.
    Before,
    /// The left side happened strictly after the right.
    After,
    /// Neither side is an ancestor of the other.
    Concurrent,
    /// Both sides carry identical causal history.
    Equal,
}

/// Monotonically increasing per-node counters.
///
/// `BTreeMap` keeps the serialized form deterministic across replicas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    counters: BTreeMap<String, u64>,
}

impl VectorClock {
    /// Create an empty clock.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counters: BTreeMap::new(),
        }
    }

    /// Bump the counter for `node`.
    pub fn increment(&mut self, node: &str) {
        *self.counters.entry(node.to_string()).or_insert(0) += 1;
    }

    /// Counter value for `node` (0 when the node was never seen).
    #[must_use]
    pub fn get(&self, node: &str) -> u64 {
        self.counters.get(node).copied().unwrap_or(0)
    }

    /// Merge `other` into `self`, taking the pointwise maximum.
    pub fn merge(&mut self, other: &Self) {
        for (node, &count) in &other.counters {
            let entry = self.counters.entry(node.clone()).or_insert(0);
            *entry = (*entry).max(count);
        }
    }

    /// Partial-order comparison over the union of both node sets.
    #[must_use]
    pub fn compare(&self, other: &Self) -> CausalRelation {
        let mut some_less = false;
        let mut some_greater = false;

        for node in self.counters.keys().chain(other.counters.keys()) {
            let a = self.get(node);
            let b = other.get(node);
            if a < b {
                some_less = true;
            } else if a > b {
                some_greater = true;
            }
        }

        match (some_less, some_greater) {
            (false, false) => CausalRelation::Equal,
            (true, false) => CausalRelation::Before,
            (false, true) => CausalRelation::After,
            (true, true) => CausalRelation::Concurrent,
        }
    }

    /// Number of nodes with a recorded counter.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.counters.len()
    }
}
