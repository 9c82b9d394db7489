//! State management module.
//!
//! This module provides persistent state storage for tracking which nodes
//! were created, their provider handles, the last outputs and run history.

mod local;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use store::StateStore;
pub use types::{
    DeploymentHistoryEntry, DeploymentOperation, DeploymentState, NodeRecord, STATE_VERSION,
};
