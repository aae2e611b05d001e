//! Step dependency graph.
//!
//! Nodes are keyed by `(item id, stage)`; the run-wide finalize step has no
//! item. Every prerequisite must already be in the graph when a step is
//! inserted, so the graph is acyclic by construction.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use strum::{Display, EnumString};
use tracing::debug;

use crate::{Error, Result};

/// A stage of the per-item pipeline, or the run-wide finalize step.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Prepare,
    Align,
    Materialize,
    Finalize,
}

/// Identifies a step in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepKey {
    pub item_id: Option<String>,
    pub stage: Stage,
}

impl StepKey {
    pub fn item(item_id: impl Into<String>, stage: Stage) -> Self {
        Self {
            item_id: Some(item_id.into()),
            stage,
        }
    }

    pub fn finalize() -> Self {
        Self {
            item_id: None,
            stage: Stage::Finalize,
        }
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.item_id {
            Some(id) => write!(f, "{}/{}", id, self.stage),
            None => write!(f, "{}", self.stage),
        }
    }
}

/// Index of a step in its graph.
pub type StepId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum StepStatus {
    /// Waiting on prerequisites.
    Blocked,
    /// All prerequisites done, not yet handed out.
    Ready,
    Running,
    Completed,
}

#[derive(Debug)]
struct StepNode {
    key: StepKey,
    status: StepStatus,
    /// Prerequisites not yet completed.
    pending: usize,
    dependents: Vec<StepId>,
}

/// Incrementally built DAG of steps.
#[derive(Debug, Default)]
pub struct StepGraph {
    nodes: Vec<StepNode>,
    index: HashMap<StepKey, StepId>,
    ready: VecDeque<StepId>,
    completed: usize,
}

impl StepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a step that runs after every step in `prerequisites`.
    pub fn insert(&mut self, key: StepKey, prerequisites: &[StepKey]) -> Result<StepId> {
        if self.index.contains_key(&key) {
            return Err(Error::Graph(format!("step {key} already exists")));
        }

        let mut prereq_ids = Vec::with_capacity(prerequisites.len());
        for prereq in prerequisites {
            let id = self
                .index
                .get(prereq)
                .copied()
                .ok_or_else(|| Error::Graph(format!("step {key} depends on unknown step {prereq}")))?;
            prereq_ids.push(id);
        }

        let id = self.nodes.len();
        let mut pending = 0;
        for &prereq in &prereq_ids {
            let node = &mut self.nodes[prereq];
            if node.status != StepStatus::Completed {
                node.dependents.push(id);
                pending += 1;
            }
        }

        let status = if pending == 0 {
            self.ready.push_back(id);
            StepStatus::Ready
        } else {
            StepStatus::Blocked
        };

        debug!(step = %key, prerequisites = prereq_ids.len(), %status, "Inserted step");
        self.index.insert(key.clone(), id);
        self.nodes.push(StepNode {
            key,
            status,
            pending,
            dependents: Vec::new(),
        });
        Ok(id)
    }

    /// Hand out every step whose prerequisites are complete, marking them running.
    pub fn take_ready(&mut self) -> Vec<(StepId, StepKey)> {
        let mut out = Vec::with_capacity(self.ready.len());
        while let Some(id) = self.ready.pop_front() {
            let node = &mut self.nodes[id];
            node.status = StepStatus::Running;
            out.push((id, node.key.clone()));
        }
        out
    }

    /// Mark a running step done and release its dependents.
    pub fn complete(&mut self, id: StepId) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| Error::Graph(format!("unknown step id {id}")))?;
        if node.status != StepStatus::Running {
            return Err(Error::Graph(format!(
                "step {} completed while {}",
                node.key, node.status
            )));
        }
        node.status = StepStatus::Completed;
        self.completed += 1;

        let dependents = std::mem::take(&mut node.dependents);
        for dependent in dependents {
            let node = &mut self.nodes[dependent];
            node.pending -= 1;
            if node.pending == 0 {
                node.status = StepStatus::Ready;
                self.ready.push_back(dependent);
            }
        }
        Ok(())
    }

    pub fn status(&self, key: &StepKey) -> Option<StepStatus> {
        self.index.get(key).map(|&id| self.nodes[id].status)
    }

    /// Whether every inserted step has completed.
    pub fn is_drained(&self) -> bool {
        self.completed == self.nodes.len()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(graph: &mut StepGraph, id: &str) -> StepKey {
        let prepare = StepKey::item(id, Stage::Prepare);
        let align = StepKey::item(id, Stage::Align);
        let materialize = StepKey::item(id, Stage::Materialize);
        graph.insert(prepare.clone(), &[]).unwrap();
        graph.insert(align.clone(), &[prepare]).unwrap();
        graph.insert(materialize.clone(), &[align]).unwrap();
        materialize
    }

    fn keys(ready: &[(StepId, StepKey)]) -> Vec<String> {
        ready.iter().map(|(_, k)| k.to_string()).collect()
    }

    #[test]
    fn test_step_key_display() {
        assert_eq!(StepKey::item("ts1", Stage::Align).to_string(), "ts1/align");
        assert_eq!(StepKey::finalize().to_string(), "finalize");
    }

    #[test]
    fn test_chain_runs_in_order() {
        let mut graph = StepGraph::new();
        chain(&mut graph, "ts1");

        let ready = graph.take_ready();
        assert_eq!(keys(&ready), vec!["ts1/prepare"]);
        assert!(graph.take_ready().is_empty());

        graph.complete(ready[0].0).unwrap();
        let ready = graph.take_ready();
        assert_eq!(keys(&ready), vec!["ts1/align"]);

        graph.complete(ready[0].0).unwrap();
        let ready = graph.take_ready();
        assert_eq!(keys(&ready), vec!["ts1/materialize"]);
        assert!(!graph.is_drained());

        graph.complete(ready[0].0).unwrap();
        assert!(graph.is_drained());
    }

    #[test]
    fn test_finalize_waits_for_every_item() {
        let mut graph = StepGraph::new();
        let a = chain(&mut graph, "a");
        let b = chain(&mut graph, "b");
        graph.insert(StepKey::finalize(), &[a, b]).unwrap();

        let mut finalize_seen = false;
        loop {
            let ready = graph.take_ready();
            if ready.is_empty() {
                break;
            }
            for (id, key) in ready {
                if key.stage == Stage::Finalize {
                    assert_eq!(
                        graph.status(&StepKey::item("a", Stage::Materialize)),
                        Some(StepStatus::Completed)
                    );
                    assert_eq!(
                        graph.status(&StepKey::item("b", Stage::Materialize)),
                        Some(StepStatus::Completed)
                    );
                    finalize_seen = true;
                }
                graph.complete(id).unwrap();
            }
        }
        assert!(finalize_seen);
        assert!(graph.is_drained());
    }

    #[test]
    fn test_prerequisite_already_completed() {
        let mut graph = StepGraph::new();
        let prepare = StepKey::item("ts1", Stage::Prepare);
        graph.insert(prepare.clone(), &[]).unwrap();
        let (id, _) = graph.take_ready().remove(0);
        graph.complete(id).unwrap();

        graph
            .insert(StepKey::item("ts1", Stage::Align), &[prepare])
            .unwrap();
        assert_eq!(keys(&graph.take_ready()), vec!["ts1/align"]);
    }

    #[test]
    fn test_rejects_unknown_prerequisite_and_duplicates() {
        let mut graph = StepGraph::new();
        let err = graph
            .insert(
                StepKey::item("ts1", Stage::Align),
                &[StepKey::item("ts1", Stage::Prepare)],
            )
            .unwrap_err();
        assert!(matches!(err, Error::Graph(_)));
        assert!(graph.is_empty());

        graph.insert(StepKey::item("ts1", Stage::Prepare), &[]).unwrap();
        assert!(graph.insert(StepKey::item("ts1", Stage::Prepare), &[]).is_err());
    }

    #[test]
    fn test_complete_requires_running() {
        let mut graph = StepGraph::new();
        let id = graph.insert(StepKey::item("ts1", Stage::Prepare), &[]).unwrap();
        assert!(graph.complete(id).is_err());
        graph.take_ready();
        graph.complete(id).unwrap();
        assert!(graph.complete(id).is_err());
        assert!(graph.complete(42).is_err());
    }
}
