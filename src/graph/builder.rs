//! Builds a finalized resource graph from a deployment configuration.

use crate::config::DeployConfig;
use crate::error::{ConfigError, Result, VpnError};
use serde_json::{json, Value};
use tracing::info;

use super::model::ResourceGraph;
use super::types::{Properties, RefRole, Reference, ResourceKind};

/// Logical key of the gateway NSG.
pub const GATEWAY_NSG_KEY: &str = "gateway";

/// Turns a [`DeployConfig`] into a [`ResourceGraph`].
#[derive(Debug)]
pub struct GraphBuilder<'a> {
    config: &'a DeployConfig,
    graph: ResourceGraph,
}

impl<'a> GraphBuilder<'a> {
    /// Creates a builder for a configuration.
    #[must_use]
    pub fn new(config: &'a DeployConfig) -> Self {
        Self {
            config,
            graph: ResourceGraph::new(),
        }
    }

    /// Builds and finalizes the graph in one step.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for duplicate keys, unresolvable
    /// references or cycles.
    pub fn from_config(config: &'a DeployConfig) -> Result<ResourceGraph> {
        Self::new(config).build()
    }

    /// Builds and finalizes the graph.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for duplicate keys, unresolvable
    /// references or cycles.
    pub fn build(mut self) -> Result<ResourceGraph> {
        self.add_public_ips()?;
        self.add_nsg()?;
        let ip_config_keys = self.add_ip_configurations()?;
        self.add_gateway(&ip_config_keys)?;
        self.add_local_network_gateways()?;
        self.add_connections()?;

        self.graph.finalize()?;
        info!(
            "Built graph for {} with {} resources",
            self.config.vpn_gateway_name,
            self.graph.len()
        );
        Ok(self.graph)
    }

    fn base_properties(&self) -> Properties {
        let tags: serde_json::Map<String, Value> = self
            .config
            .merged_tags()
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();

        Properties::from([
            (String::from("location"), json!(self.config.location)),
            (String::from("tags"), Value::Object(tags)),
        ])
    }

    fn add_public_ips(&mut self) -> Result<()> {
        for (key, pip) in &self.config.public_ip_configurations {
            let mut properties = self.base_properties();
            properties.insert(String::from("allocation_method"), json!(pip.allocation_method));
            properties.insert(String::from("sku"), json!(pip.sku));
            properties.insert(String::from("zones"), json!(pip.zones));

            self.graph
                .add_node(ResourceKind::PublicIp, key, &pip.name, properties, vec![])?;
        }
        Ok(())
    }

    fn add_nsg(&mut self) -> Result<()> {
        if let Some(name) = self.config.gateway_nsg_name() {
            let properties = self.base_properties();
            self.graph
                .add_node(ResourceKind::Nsg, GATEWAY_NSG_KEY, name, properties, vec![])?;
        }
        Ok(())
    }

    fn add_ip_configurations(&mut self) -> Result<Vec<String>> {
        let mut keys = Vec::with_capacity(self.config.ip_configurations.len());

        for (i, ip_config) in self.config.ip_configurations.iter().enumerate() {
            let public_ip_key = match &ip_config.public_ip {
                Some(key) => key.clone(),
                None => self
                    .config
                    .public_ip_configurations
                    .get_index(i)
                    .map(|(key, _)| key.clone())
                    .ok_or_else(|| {
                        VpnError::Config(ConfigError::validation(
                            format!("No public IP declared at position {i}"),
                            format!("ip_configurations[{i}].public_ip"),
                        ))
                    })?,
            };

            let mut properties = self.base_properties();
            properties.insert(
                String::from("private_ip_address_allocation"),
                json!(ip_config.private_ip_address_allocation),
            );
            properties.insert(String::from("subnet_id"), json!(ip_config.subnet_id));

            self.graph.add_node(
                ResourceKind::GatewayIpConfig,
                &ip_config.name,
                format!("{}/{}", self.config.vpn_gateway_name, ip_config.name),
                properties,
                vec![Reference::new(RefRole::PublicIp, public_ip_key)],
            )?;
            keys.push(ip_config.name.clone());
        }

        Ok(keys)
    }

    fn add_gateway(&mut self, ip_config_keys: &[String]) -> Result<()> {
        let config = self.config;
        let mut properties = self.base_properties();
        properties.insert(String::from("gateway_type"), json!("Vpn"));
        properties.insert(String::from("vpn_type"), json!(config.vpn_type.to_string()));
        properties.insert(String::from("sku"), json!(config.sku));
        properties.insert(String::from("active_active"), json!(config.active_active));
        properties.insert(String::from("enable_bgp"), json!(config.enable_bgp));
        if let Some(asn) = config.effective_bgp_asn() {
            properties.insert(String::from("bgp_asn"), json!(asn));
        }

        let mut references: Vec<Reference> = ip_config_keys
            .iter()
            .map(|key| Reference::new(RefRole::IpConfiguration, key.clone()))
            .collect();
        if config.create_gateway_nsg {
            references.push(Reference::new(RefRole::NetworkSecurityGroup, GATEWAY_NSG_KEY));
        }

        self.graph.add_node(
            ResourceKind::VpnGateway,
            &config.vpn_gateway_name,
            &config.vpn_gateway_name,
            properties,
            references,
        )
    }

    fn add_local_network_gateways(&mut self) -> Result<()> {
        for (key, lng) in &self.config.local_network_gateways {
            let mut properties = self.base_properties();
            properties.insert(String::from("gateway_address"), json!(lng.gateway_address));
            properties.insert(String::from("address_space"), json!(lng.address_space));

            self.graph.add_node(
                ResourceKind::LocalNetworkGateway,
                key,
                &lng.name,
                properties,
                vec![],
            )?;
        }
        Ok(())
    }

    fn add_connections(&mut self) -> Result<()> {
        let config = self.config;

        for (key, connection) in &config.vpn_connections {
            let lng_key = match &connection.local_network_gateway {
                Some(lng) => lng.clone(),
                None if config.local_network_gateways.len() == 1 => config
                    .local_network_gateways
                    .keys()
                    .next()
                    .cloned()
                    .unwrap_or_default(),
                None => {
                    return Err(VpnError::Config(ConfigError::validation(
                        "local_network_gateway is required unless exactly one is declared",
                        format!("vpn_connections.{key}.local_network_gateway"),
                    )));
                }
            };

            let mut properties = self.base_properties();
            properties.insert(String::from("connection_type"), json!(connection.connection_type));
            properties.insert(
                String::from("connection_protocol"),
                json!(connection.connection_protocol),
            );
            properties.insert(String::from("shared_key"), json!(connection.shared_key));
            if let Some(policy) = &connection.ipsec_policy {
                let policy: serde_json::Map<String, Value> = policy
                    .fields()
                    .into_iter()
                    .map(|(field, value)| (field.to_string(), json!(value)))
                    .collect();
                properties.insert(String::from("ipsec_policy"), Value::Object(policy));
            }

            self.graph.add_node(
                ResourceKind::VpnConnection,
                key,
                &connection.name,
                properties,
                vec![
                    Reference::new(RefRole::VirtualNetworkGateway, &config.vpn_gateway_name),
                    Reference::new(RefRole::LocalNetworkGateway, lng_key),
                ],
            )?;
        }
        Ok(())
    }
}
