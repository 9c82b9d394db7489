//! State types recorded between runs.
//!
//! The state remembers which nodes reached `Created` and their provider
//! handles, so a later run can restore them by logical key and `outputs` or
//! `destroy` can run without re-applying.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, StateError, VpnError};
use crate::graph::{NodeId, NodeState, ProviderHandle, ResourceGraph, ResourceKind};
use crate::outputs::OutputMap;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// History entries kept in the state file.
const MAX_HISTORY: usize = 100;

/// The complete deployment state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentState {
    /// State format version.
    pub version: String,
    /// Resource group of the deployment.
    pub resource_group: String,
    /// Name of the VPN gateway.
    pub gateway_name: String,
    /// Hash of the last applied configuration.
    pub config_hash: String,
    /// Identifier of the last run.
    #[serde(default)]
    pub last_run_id: Option<String>,
    /// Node records keyed by `kind/key`.
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeRecord>,
    /// Outputs of the last fully converged run.
    #[serde(default)]
    pub outputs: Option<OutputMap>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Recent runs.
    #[serde(default)]
    pub history: Vec<DeploymentHistoryEntry>,
}

/// Recorded state of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Logical key.
    pub key: String,
    /// Provider-facing name.
    pub name: String,
    /// State at the end of the run.
    pub state: NodeState,
    /// Handle, when created.
    #[serde(default)]
    pub handle: Option<ProviderHandle>,
    /// When the record was written.
    pub updated_at: DateTime<Utc>,
}

/// A single entry in the deployment history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentHistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: DeploymentOperation,
    /// Run identifier.
    pub run_id: String,
    /// Configuration hash at the time of the run.
    pub config_hash: String,
    /// One-line run summary.
    pub summary: String,
    /// Whether the run succeeded.
    pub success: bool,
}

/// Types of recorded operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentOperation {
    /// Convergence run.
    Apply,
    /// Teardown run.
    Destroy,
}

impl DeploymentState {
    /// Creates an empty state.
    #[must_use]
    pub fn new(resource_group: &str, gateway_name: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            resource_group: resource_group.to_string(),
            gateway_name: gateway_name.to_string(),
            config_hash: String::new(),
            last_run_id: None,
            nodes: BTreeMap::new(),
            outputs: None,
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Fails unless the state was written by a compatible version.
    ///
    /// # Errors
    ///
    /// Returns `VersionMismatch`.
    pub fn check_version(&self) -> Result<()> {
        if self.version == STATE_VERSION {
            Ok(())
        } else {
            Err(VpnError::State(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: self.version.clone(),
            }))
        }
    }

    /// Replaces node records with the graph's current states.
    ///
    /// A node that failed or was never dispatched this run keeps the handle
    /// recorded for it earlier, since the resource may still exist.
    pub fn record_graph(&mut self, graph: &ResourceGraph) {
        let now = Utc::now();
        let mut nodes = BTreeMap::new();

        for node in graph.nodes() {
            let key = node.id.to_string();
            let handle = node
                .handle
                .clone()
                .or_else(|| self.nodes.get(&key).and_then(|r| r.handle.clone()));
            nodes.insert(
                key,
                NodeRecord {
                    kind: node.kind(),
                    key: node.key().to_string(),
                    name: node.name.clone(),
                    state: node.state,
                    handle,
                    updated_at: now,
                },
            );
        }

        self.nodes = nodes;
        self.last_updated = now;
    }

    /// Returns handles of nodes recorded as `Created`.
    #[must_use]
    pub fn created_handles(&self) -> Vec<(NodeId, ProviderHandle)> {
        self.nodes
            .values()
            .filter(|r| r.state == NodeState::Created)
            .filter_map(|r| {
                r.handle
                    .clone()
                    .map(|h| (NodeId::new(r.kind, r.key.clone()), h))
            })
            .collect()
    }

    /// Returns the record of one node.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&NodeRecord> {
        self.nodes.get(&id.to_string())
    }

    /// Adds a history entry, dropping the oldest beyond the limit.
    pub fn add_history(&mut self, entry: DeploymentHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
        self.last_updated = Utc::now();
    }
}

impl DeploymentHistoryEntry {
    /// Creates a history entry.
    #[must_use]
    pub fn new(
        operation: DeploymentOperation,
        run_id: &str,
        config_hash: &str,
        summary: String,
        success: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            run_id: run_id.to_string(),
            config_hash: config_hash.to_string(),
            summary,
            success,
        }
    }
}

impl std::fmt::Display for DeploymentOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Apply => write!(f, "apply"),
            Self::Destroy => write!(f, "destroy"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Properties;

    fn graph() -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        graph
            .add_node(ResourceKind::PublicIp, "pip1", "pip-1", Properties::new(), vec![])
            .unwrap();
        graph
            .add_node(ResourceKind::Nsg, "gateway", "nsg-gateway-gw", Properties::new(), vec![])
            .unwrap();
        graph.finalize().unwrap();
        graph
    }

    #[test]
    fn test_record_graph_keeps_created_handles() {
        let mut graph = graph();
        let pip = NodeId::new(ResourceKind::PublicIp, "pip1");
        graph.mark_creating(&pip).unwrap();
        graph.mark_created(&pip, ProviderHandle::new("/pip-1")).unwrap();

        let mut state = DeploymentState::new("rg", "gw");
        state.record_graph(&graph);

        assert_eq!(state.nodes.len(), 2);
        let handles = state.created_handles();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].0, pip);
        assert_eq!(
            state.node(&NodeId::new(ResourceKind::Nsg, "gateway")).unwrap().state,
            NodeState::Pending
        );
    }

    #[test]
    fn test_earlier_handle_survives_failed_run() {
        let mut first = graph();
        let pip = NodeId::new(ResourceKind::PublicIp, "pip1");
        first.mark_creating(&pip).unwrap();
        first.mark_created(&pip, ProviderHandle::new("/pip-1")).unwrap();
        let mut state = DeploymentState::new("rg", "gw");
        state.record_graph(&first);

        state.record_graph(&graph());

        let record = state.node(&pip).unwrap();
        assert_eq!(record.state, NodeState::Pending);
        assert_eq!(record.handle.as_ref().map(|h| h.id.as_str()), Some("/pip-1"));
        assert!(state.created_handles().is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = DeploymentState::new("rg", "gw");
        for i in 0..(MAX_HISTORY + 5) {
            state.add_history(DeploymentHistoryEntry::new(
                DeploymentOperation::Apply,
                &i.to_string(),
                "hash",
                String::new(),
                true,
            ));
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
        assert_eq!(state.history[0].run_id, "5");
    }

    #[test]
    fn test_version_check() {
        let mut state = DeploymentState::new("rg", "gw");
        assert!(state.check_version().is_ok());
        state.version = String::from("0.1");
        assert!(state.check_version().is_err());
    }
}
