//! Deployment plan: execution waves annotated with the change each node needs.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::graph::NodeId;

use super::diff::{DiffType, ResourceDiff};
use super::resolver::ExecutionPlan;

/// A complete deployment plan.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Configuration hash this plan is based on.
    pub config_hash: String,
    /// Dispatch order.
    pub execution: ExecutionPlan,
    /// One entry per node, in wave order.
    pub changes: Vec<PlannedChange>,
}

/// The change planned for one node.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedChange {
    /// Node identity.
    pub node: NodeId,
    /// Provider-facing name.
    pub name: String,
    /// Wave the node is dispatched in.
    pub wave: usize,
    /// Planned action.
    pub action: DiffType,
    /// Fields that differ from the live resource.
    pub fields: Vec<String>,
}

impl PlannedChange {
    /// Creates a planned change from a diff.
    #[must_use]
    pub fn from_diff(node: NodeId, wave: usize, diff: &ResourceDiff) -> Self {
        Self {
            node,
            name: diff.name.clone(),
            wave,
            action: diff.diff_type,
            fields: diff.details.iter().map(|d| d.field.clone()).collect(),
        }
    }
}

impl DeploymentPlan {
    /// Creates a plan.
    #[must_use]
    pub fn new(config_hash: &str, execution: ExecutionPlan, changes: Vec<PlannedChange>) -> Self {
        Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            execution,
            changes,
        }
    }

    /// Returns true if any node needs a create or update.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.changes.iter().any(|c| c.action != DiffType::NoChange)
    }

    /// Counts changes of one type.
    #[must_use]
    pub fn count(&self, action: DiffType) -> usize {
        self.changes.iter().filter(|c| c.action == action).count()
    }

    /// Returns a one-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} to create, {} to update, {} unchanged across {} waves",
            self.count(DiffType::Create),
            self.count(DiffType::Update),
            self.count(DiffType::NoChange),
            self.execution.len()
        )
    }
}
