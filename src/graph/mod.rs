//! Resource graph model.
//!
//! This module provides:
//! - Typed resource nodes, references and runtime state
//! - The [`ResourceGraph`] with its topology checks
//! - A builder that turns a deployment configuration into a graph

mod builder;
mod model;
mod types;

pub use builder::{GraphBuilder, GATEWAY_NSG_KEY};
pub use model::ResourceGraph;
pub use types::{
    FailureCause, NodeFailure, NodeId, NodeState, Properties, ProviderHandle, RefRole, Reference,
    ResourceKind, ResourceNode,
};
