//! Cloud provider integration.
//!
//! This module provides:
//! - The [`Provider`] trait the engine drives
//! - An Azure Resource Manager client
//! - An in-memory simulated control plane

mod arm;
mod azure;
mod memory;
mod traits;

pub use azure::{AzureProvider, API_VERSION, ARM_BASE_URL};
pub use memory::SimulatedProvider;
pub use traits::{
    DeleteStatus, LiveResource, Provider, ProviderResult, ProvisionStatus, ProvisioningState,
    ResourceRequest,
};

#[cfg(test)]
pub use traits::MockProvider;

use crate::graph::ResourceKind;

/// Builds the ARM resource id of a named resource.
///
/// Gateway IP configurations are named `<gateway>/<ip-config>` and live
/// under the gateway.
#[must_use]
pub fn arm_id(subscription_id: &str, resource_group: &str, kind: ResourceKind, name: &str) -> String {
    let prefix = format!(
        "/subscriptions/{subscription_id}/resourceGroups/{resource_group}/providers/Microsoft.Network"
    );

    match (kind, name.split_once('/')) {
        (ResourceKind::GatewayIpConfig, Some((gateway, ip_config))) => {
            format!("{prefix}/virtualNetworkGateways/{gateway}/ipConfigurations/{ip_config}")
        }
        _ => format!("{prefix}/{}/{name}", kind.arm_type()),
    }
}
