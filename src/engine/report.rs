//! Run reports.

use serde::Serialize;
use std::fmt;

use crate::graph::{FailureCause, NodeId, NodeState, ResourceGraph};

/// What a worker did to converge a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeAction {
    /// The resource did not exist and was created.
    Created,
    /// The resource existed with different properties and was updated.
    Updated,
    /// The resource already matched; no write was issued.
    Unchanged,
    /// The node was never dispatched or failed before acting.
    None,
}

impl fmt::Display for NodeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Unchanged => write!(f, "unchanged"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Final outcome of one node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    /// Node identity.
    pub node: NodeId,
    /// Provider-facing name.
    pub name: String,
    /// Wave the node belongs to.
    pub wave: usize,
    /// Final state.
    pub state: NodeState,
    /// Action taken.
    pub action: NodeAction,
    /// Provider calls attempted, including retries.
    pub attempts: u32,
    /// Create-or-update calls issued.
    pub create_calls: u32,
    /// Failure cause, when failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<FailureCause>,
    /// Error kind, when failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Error message, when failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: String,
    /// One entry per node, in wave order.
    pub nodes: Vec<NodeReport>,
    /// Number of waves dispatched.
    pub waves_dispatched: usize,
    /// Total number of waves in the plan.
    pub waves_total: usize,
    /// True if a failure or cancellation stopped dispatch.
    pub aborted: bool,
}

impl RunReport {
    /// Returns true if every node ended `Created`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.aborted && self.nodes.iter().all(|n| n.state == NodeState::Created)
    }

    /// Returns the failed nodes.
    #[must_use]
    pub fn failed(&self) -> Vec<&NodeReport> {
        self.nodes
            .iter()
            .filter(|n| n.state == NodeState::Failed)
            .collect()
    }

    /// Returns the report of one node.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| &n.node == id)
    }

    /// Returns the total number of create-or-update calls.
    #[must_use]
    pub fn total_create_calls(&self) -> u32 {
        self.nodes.iter().map(|n| n.create_calls).sum()
    }

    /// Counts nodes by action.
    #[must_use]
    pub fn count(&self, action: NodeAction) -> usize {
        self.nodes.iter().filter(|n| n.action == action).count()
    }

    /// Refreshes state and failure fields from the graph.
    ///
    /// Nodes never dispatched keep their graph state.
    pub fn sync_from_graph(&mut self, graph: &ResourceGraph) {
        for entry in &mut self.nodes {
            if let Some(node) = graph.get(&entry.node) {
                entry.state = node.state;
                if let Some(failure) = &node.failure {
                    entry.cause = Some(failure.cause);
                    entry.error_kind = Some(failure.error_kind.clone());
                    entry.message = Some(failure.message.clone());
                }
            }
        }
    }

    /// Returns a one-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} created, {} updated, {} unchanged, {} failed ({}/{} waves)",
            self.count(NodeAction::Created),
            self.count(NodeAction::Updated),
            self.count(NodeAction::Unchanged),
            self.failed().len(),
            self.waves_dispatched,
            self.waves_total
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ResourceKind;

    fn entry(key: &str, state: NodeState, action: NodeAction, create_calls: u32) -> NodeReport {
        NodeReport {
            node: NodeId::new(ResourceKind::PublicIp, key),
            name: key.to_string(),
            wave: 0,
            state,
            action,
            attempts: create_calls,
            create_calls,
            cause: None,
            error_kind: None,
            message: None,
        }
    }

    #[test]
    fn test_summary_and_success() {
        let report = RunReport {
            run_id: String::from("r"),
            nodes: vec![
                entry("a", NodeState::Created, NodeAction::Created, 1),
                entry("b", NodeState::Created, NodeAction::Unchanged, 0),
            ],
            waves_dispatched: 1,
            waves_total: 1,
            aborted: false,
        };

        assert!(report.is_success());
        assert_eq!(report.total_create_calls(), 1);
        assert_eq!(
            report.summary(),
            "1 created, 0 updated, 1 unchanged, 0 failed (1/1 waves)"
        );
    }

    #[test]
    fn test_failure_is_not_success() {
        let report = RunReport {
            nodes: vec![entry("a", NodeState::Failed, NodeAction::None, 1)],
            aborted: true,
            ..RunReport::default()
        };
        assert!(!report.is_success());
        assert_eq!(report.failed().len(), 1);
    }

    #[test]
    fn test_serializes_without_empty_errors() {
        let json = serde_json::to_value(entry("a", NodeState::Created, NodeAction::Created, 1))
            .unwrap();
        assert_eq!(json["state"], "created");
        assert!(json.get("error_kind").is_none());
    }
}
