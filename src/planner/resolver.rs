//! Dependency resolution into execution waves.
//!
//! Wave 0 holds nodes without references. Every later wave holds nodes whose
//! references all lie in strictly earlier waves. Within a wave nodes are
//! ordered by (kind, key).

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

use crate::error::{ConfigError, PlanError, Result, VpnError};
use crate::graph::{NodeId, ResourceGraph};

/// One layer of the execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Wave {
    /// Zero-based wave index.
    pub index: usize,
    /// Nodes dispatched together, in (kind, key) order.
    pub nodes: Vec<NodeId>,
}

/// Ordered waves for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    /// Waves in dispatch order.
    pub waves: Vec<Wave>,
}

/// Computes execution plans from finalized graphs.
#[derive(Debug, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    /// Creates a new resolver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Layers the graph into waves.
    ///
    /// # Errors
    ///
    /// Returns `GraphNotFinalized` for an open graph and `CyclicDependency`
    /// if nodes remain unplaced.
    pub fn resolve(&self, graph: &ResourceGraph) -> Result<ExecutionPlan> {
        if !graph.is_finalized() {
            return Err(VpnError::Plan(PlanError::GraphNotFinalized));
        }

        let mut placed: HashSet<NodeId> = HashSet::with_capacity(graph.len());
        let mut remaining: Vec<&NodeId> = graph.nodes().map(|n| &n.id).collect();
        let mut waves = Vec::new();

        while !remaining.is_empty() {
            let (mut ready, blocked): (Vec<&NodeId>, Vec<&NodeId>) =
                remaining.into_iter().partition(|id| {
                    graph.get(id).is_some_and(|node| {
                        node.references
                            .iter()
                            .all(|r| placed.contains(&r.target))
                    })
                });

            if ready.is_empty() {
                let stuck: Vec<String> = blocked.iter().map(ToString::to_string).collect();
                return Err(VpnError::Config(ConfigError::CyclicDependency {
                    cycle: stuck.join(", "),
                }));
            }

            ready.sort();
            let index = waves.len();
            debug!("Wave {} has {} nodes", index, ready.len());

            placed.extend(ready.iter().map(|id| (*id).clone()));
            waves.push(Wave {
                index,
                nodes: ready.into_iter().cloned().collect(),
            });
            remaining = blocked;
        }

        Ok(ExecutionPlan { waves })
    }
}

impl ExecutionPlan {
    /// Returns the number of waves.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waves.len()
    }

    /// Returns true if there are no waves.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    /// Returns the total number of nodes across waves.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.waves.iter().map(|w| w.nodes.len()).sum()
    }

    /// Returns the wave index of a node.
    #[must_use]
    pub fn wave_of(&self, id: &NodeId) -> Option<usize> {
        self.waves
            .iter()
            .find(|w| w.nodes.contains(id))
            .map(|w| w.index)
    }

    /// Returns waves in teardown order (last wave first).
    #[must_use]
    pub fn reversed(&self) -> Vec<Wave> {
        self.waves.iter().rev().cloned().collect()
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for wave in &self.waves {
            let nodes: Vec<String> = wave.nodes.iter().map(ToString::to_string).collect();
            writeln!(f, "Wave {}: {}", wave.index, nodes.join(", "))?;
        }
        Ok(())
    }
}
