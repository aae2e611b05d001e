//! State shared by the scheduler loop and the item pipelines.
//!
//! The input view, the processed multiset, the failed set and the per-item
//! states sit behind one mutex. Callers get copies out; nothing borrowed from
//! the lock survives past a method call.

use itertools::Itertools;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::Result;
use crate::collection::{InputCollection, InputSnapshot};
use crate::domain::{CollectionMetadata, Item, ItemState};

struct Inner {
    input: Box<dyn InputCollection>,
    /// Ids in scheduling order, duplicates kept.
    processed: Vec<String>,
    /// The version of each item its pipeline works on, pinned at schedule time.
    scheduled: HashMap<String, Item>,
    failed: HashSet<String>,
    states: HashMap<String, ItemState>,
}

/// Outcome of one scheduling pass over the input.
#[derive(Debug, Clone, Default)]
pub struct IterationPlan {
    /// Items scheduled by this pass.
    pub newly_ready: Vec<Item>,
    pub stream_open: bool,
    /// Visible items with no sub-records yet.
    pub waiting: usize,
    /// The stream is closed and every input id has been scheduled.
    pub complete: bool,
    pub discrepancy: Discrepancy,
}

/// Difference between the processed multiset and the input ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discrepancy {
    /// Input ids (with multiplicity) never scheduled.
    pub missing: Vec<String>,
    /// Scheduled ids (with multiplicity) absent from the input.
    pub unexpected: Vec<String>,
}

impl Discrepancy {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

/// Compare `processed` against `input` as multisets.
pub fn multiset_discrepancy(processed: &[String], input: &[String]) -> Discrepancy {
    let processed_counts = processed.iter().counts();
    let input_counts = input.iter().counts();

    let excess = |left: &HashMap<&String, usize>, right: &HashMap<&String, usize>| {
        left.iter()
            .flat_map(|(id, &n)| {
                let extra = n.saturating_sub(right.get(id).copied().unwrap_or(0));
                std::iter::repeat_n((*id).clone(), extra)
            })
            .sorted()
            .collect::<Vec<_>>()
    };

    Discrepancy {
        missing: excess(&input_counts, &processed_counts),
        unexpected: excess(&processed_counts, &input_counts),
    }
}

pub struct SharedState {
    inner: Mutex<Inner>,
}

impl SharedState {
    pub fn new(input: Box<dyn InputCollection>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                input,
                processed: Vec::new(),
                scheduled: HashMap::new(),
                failed: HashSet::new(),
                states: HashMap::new(),
            }),
        }
    }

    pub fn metadata(&self) -> CollectionMetadata {
        self.inner.lock().input.metadata()
    }

    /// Reload the input view.
    pub fn refresh(&self) -> Result<()> {
        self.inner.lock().input.refresh()
    }

    /// Record ids handled by an earlier run so they are not scheduled again.
    pub fn seed_processed(&self, ids: impl IntoIterator<Item = String>) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.processed.len();
        inner.processed.extend(ids);
        inner.processed.len() - before
    }

    /// Schedule every ready item not yet processed and check for closure.
    ///
    /// Ids join the processed multiset here, in the same critical section
    /// that decides they are new.
    pub fn plan_iteration(&self) -> IterationPlan {
        let mut inner = self.inner.lock();
        let snapshot = InputSnapshot::capture(inner.input.as_ref());

        let mut plan = IterationPlan {
            stream_open: snapshot.stream_open,
            ..Default::default()
        };

        for item in snapshot.items {
            if item.size() == 0 {
                plan.waiting += 1;
                continue;
            }
            if inner.processed.contains(&item.item_id) {
                continue;
            }
            debug!(item_id = %item.item_id, size = item.size(), "Item ready");
            inner.processed.push(item.item_id.clone());
            inner.states.insert(item.item_id.clone(), ItemState::Scheduled);
            inner.scheduled.insert(item.item_id.clone(), item.clone());
            plan.newly_ready.push(item);
        }

        plan.discrepancy = multiset_discrepancy(&inner.processed, &snapshot.ids);
        plan.complete = !plan.stream_open && plan.discrepancy.is_empty();
        plan
    }

    /// The item as it was when scheduled.
    pub fn item(&self, item_id: &str) -> Option<Item> {
        self.inner.lock().scheduled.get(item_id).cloned()
    }

    pub fn processed(&self) -> Vec<String> {
        self.inner.lock().processed.clone()
    }

    pub fn mark_failed(&self, item_id: &str) {
        self.inner.lock().failed.insert(item_id.to_string());
    }

    pub fn is_failed(&self, item_id: &str) -> bool {
        self.inner.lock().failed.contains(item_id)
    }

    pub fn failed(&self) -> Vec<String> {
        self.inner.lock().failed.iter().cloned().sorted().collect()
    }

    /// Move an item to `next`. Transitions outside the state machine are
    /// logged and ignored.
    pub fn set_state(&self, item_id: &str, next: ItemState) -> bool {
        let mut inner = self.inner.lock();
        let current = inner.states.get(item_id).copied().unwrap_or_default();
        if !current.can_transition_to(next) {
            warn!(item_id = %item_id, from = %current, to = %next, "Ignoring invalid state transition");
            return false;
        }
        inner.states.insert(item_id.to_string(), next);
        true
    }

    pub fn state(&self, item_id: &str) -> ItemState {
        self.inner
            .lock()
            .states
            .get(item_id)
            .copied()
            .unwrap_or_default()
    }

    /// Ids of the items currently in `state`, sorted.
    pub fn ids_in_state(&self, state: ItemState) -> Vec<String> {
        self.inner
            .lock()
            .states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(id, _)| id.clone())
            .sorted()
            .collect()
    }
}
