//! The narrow interface the orchestrator uses to talk to a control plane.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProviderError;
use crate::graph::{Properties, ProviderHandle, ResourceKind};

/// Result of a provider call.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// A create-or-update request for one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRequest {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Provider-facing name.
    pub name: String,
    /// Properties with references already bound.
    pub properties: Properties,
}

/// Outcome of a create-or-update call.
#[derive(Debug, Clone, PartialEq)]
pub enum ProvisionStatus {
    /// The operation continues asynchronously; poll with `get`.
    Accepted,
    /// The resource is provisioned.
    Succeeded(ProviderHandle),
}

/// Outcome of a delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStatus {
    /// Deletion continues asynchronously.
    Accepted,
    /// The resource is gone.
    Deleted,
    /// The resource did not exist.
    NotFound,
}

/// Provisioning state reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningState {
    /// Terminal success.
    Succeeded,
    /// Still being created, updated or deleted.
    InProgress,
    /// Terminal failure.
    Failed,
}

impl ProvisioningState {
    /// Parses an ARM `provisioningState` value.
    #[must_use]
    pub fn from_arm(value: &str) -> Self {
        match value {
            "Succeeded" => Self::Succeeded,
            "Failed" | "Canceled" => Self::Failed,
            _ => Self::InProgress,
        }
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "Succeeded"),
            Self::InProgress => write!(f, "InProgress"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// A resource as read back from the control plane.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveResource {
    /// Provider-facing name.
    pub name: String,
    /// Identity and live attributes.
    pub handle: ProviderHandle,
    /// Live properties in the same shape as declared properties.
    pub properties: Properties,
    /// Current provisioning state.
    pub provisioning_state: ProvisioningState,
}

/// Cloud control plane operations.
///
/// Calls must be idempotent under retry for the same logical name.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Creates or updates a resource.
    async fn create_or_update(&self, request: &ResourceRequest) -> ProviderResult<ProvisionStatus>;

    /// Reads a resource; `None` means it does not exist.
    async fn get(&self, kind: ResourceKind, name: &str) -> ProviderResult<Option<LiveResource>>;

    /// Deletes a resource.
    async fn delete(&self, kind: ResourceKind, name: &str) -> ProviderResult<DeleteStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisioning_state_from_arm() {
        assert_eq!(ProvisioningState::from_arm("Succeeded"), ProvisioningState::Succeeded);
        assert_eq!(ProvisioningState::from_arm("Updating"), ProvisioningState::InProgress);
        assert_eq!(ProvisioningState::from_arm("Canceled"), ProvisioningState::Failed);
    }
}
