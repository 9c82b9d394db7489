//! Output projection.
//!
//! Flattens a converged graph into the values other tooling consumes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::DeployConfig;
use crate::error::{ProvisionError, Result, VpnError};
use crate::graph::{ResourceGraph, ResourceKind};

/// Computed outputs of a converged deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMap {
    /// Provider id of the VPN gateway.
    pub vpn_gateway_id: String,
    /// Name of the VPN gateway.
    pub vpn_gateway_name: String,
    /// Public IP names in declaration order.
    pub public_ip_names: Vec<String>,
    /// Name of the gateway NSG, empty when none was declared.
    pub gateway_nsg_name: String,
    /// VPN connection names in declaration order.
    pub vpn_connection_names: Vec<String>,
    /// Resource group holding the deployment.
    pub resource_group_name: String,
    /// Azure region.
    pub location: String,
}

/// Projects outputs from a graph.
#[derive(Debug, Default)]
pub struct OutputProjector;

impl OutputProjector {
    /// Creates a projector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Builds the output map.
    ///
    /// # Errors
    ///
    /// Returns `IncompleteGraph` unless every node is `Created`.
    pub fn project(&self, graph: &ResourceGraph, config: &DeployConfig) -> Result<OutputMap> {
        let unresolved = graph.unresolved_nodes();
        if !unresolved.is_empty() {
            return Err(VpnError::Provision(ProvisionError::IncompleteGraph {
                nodes: unresolved,
            }));
        }

        let gateway = graph
            .nodes_of_kind(ResourceKind::VpnGateway)
            .next()
            .ok_or_else(|| VpnError::internal("Graph has no VPN gateway"))?;
        let vpn_gateway_id = gateway
            .handle
            .as_ref()
            .map(|h| h.id.clone())
            .ok_or_else(|| VpnError::internal("Created gateway has no handle"))?;

        let names = |kind| -> Vec<String> {
            graph
                .nodes_of_kind(kind)
                .map(|n| n.name.clone())
                .collect()
        };

        Ok(OutputMap {
            vpn_gateway_id,
            vpn_gateway_name: gateway.name.clone(),
            public_ip_names: names(ResourceKind::PublicIp),
            gateway_nsg_name: names(ResourceKind::Nsg).into_iter().next().unwrap_or_default(),
            vpn_connection_names: names(ResourceKind::VpnConnection),
            resource_group_name: config.resource_group_name.clone(),
            location: config.location.clone(),
        })
    }
}

impl fmt::Display for OutputMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "vpn_gateway_id       = {}", self.vpn_gateway_id)?;
        writeln!(f, "vpn_gateway_name     = {}", self.vpn_gateway_name)?;
        writeln!(f, "public_ip_names      = [{}]", self.public_ip_names.join(", "))?;
        writeln!(f, "gateway_nsg_name     = {}", self.gateway_nsg_name)?;
        writeln!(f, "vpn_connection_names = [{}]", self.vpn_connection_names.join(", "))?;
        writeln!(f, "resource_group_name  = {}", self.resource_group_name)?;
        write!(f, "location             = {}", self.location)
    }
}
