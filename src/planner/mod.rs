//! Planning module for deployment operations.
//!
//! This module orders the graph into execution waves and compares declared
//! properties with live resources to decide what each node needs.

mod diff;
mod plan;
mod resolver;

pub use diff::{DiffDetail, DiffEngine, DiffType, ResourceDiff, WRITE_ONLY_KEYS};
pub use plan::{DeploymentPlan, PlannedChange};
pub use resolver::{DependencyResolver, ExecutionPlan, Wave};
