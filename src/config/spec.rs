//! Configuration specification types for the VPN gateway deployment.
//!
//! This module defines all the structs that map to the `halldyll.vpn.yaml` file.
//! These types are declarative and fully describe the desired state.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Azure's default ASN for virtual network gateways.
pub const DEFAULT_BGP_ASN: u32 = 65515;

/// The root configuration structure for a VPN gateway deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployConfig {
    /// Resource group that holds every resource.
    pub resource_group_name: String,
    /// Azure region.
    pub location: String,
    /// Environment tag (e.g., "dev", "test", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Name of the virtual network gateway.
    pub vpn_gateway_name: String,
    /// Gateway SKU.
    #[serde(default = "default_sku")]
    pub sku: String,
    /// Routing type of the gateway.
    #[serde(default)]
    pub vpn_type: VpnType,
    /// Run two gateway instances.
    #[serde(default)]
    pub active_active: bool,
    /// Enable BGP route exchange.
    #[serde(default)]
    pub enable_bgp: bool,
    /// Autonomous system number used when BGP is enabled.
    #[serde(default)]
    pub bgp_asn: Option<u32>,
    /// Create a network security group for the gateway.
    #[serde(default)]
    pub create_gateway_nsg: bool,
    /// Tags applied to every resource.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Public IP addresses keyed by logical key, in declaration order.
    #[serde(default)]
    pub public_ip_configurations: IndexMap<String, PublicIpConfig>,
    /// Gateway frontend IP configurations.
    #[serde(default)]
    pub ip_configurations: Vec<IpConfiguration>,
    /// Remote network endpoints keyed by logical key.
    #[serde(default)]
    pub local_network_gateways: IndexMap<String, LocalNetworkGatewayConfig>,
    /// Site-to-site connections keyed by logical key.
    #[serde(default)]
    pub vpn_connections: IndexMap<String, VpnConnectionConfig>,
    /// Convergence engine tuning.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Local state file settings.
    #[serde(default)]
    pub state: StateConfig,
}

/// Gateway routing type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum VpnType {
    /// Route-based VPN.
    #[default]
    RouteBased,
    /// Policy-based VPN.
    PolicyBased,
}

/// A public IP address for the gateway frontend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicIpConfig {
    /// Resource name.
    pub name: String,
    /// `Static` or `Dynamic`.
    #[serde(default = "default_allocation_method")]
    pub allocation_method: String,
    /// `Standard` or `Basic`.
    #[serde(default = "default_public_ip_sku")]
    pub sku: String,
    /// Availability zones.
    #[serde(default)]
    pub zones: Vec<String>,
}

/// A gateway frontend IP configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IpConfiguration {
    /// Configuration name.
    pub name: String,
    /// Logical key of the public IP entry to bind.
    ///
    /// When omitted the entry binds to the public IP at the same position.
    #[serde(default)]
    pub public_ip: Option<String>,
    /// Private address allocation mode.
    #[serde(default = "default_private_allocation")]
    pub private_ip_address_allocation: String,
    /// Resource ID of the `GatewaySubnet`.
    #[serde(default)]
    pub subnet_id: String,
}

/// A remote network endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalNetworkGatewayConfig {
    /// Resource name.
    pub name: String,
    /// Public address of the remote device.
    pub gateway_address: String,
    /// Remote address prefixes.
    #[serde(default)]
    pub address_space: Vec<String>,
}

/// A site-to-site connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VpnConnectionConfig {
    /// Resource name.
    pub name: String,
    /// Connection type.
    #[serde(rename = "type", default = "default_connection_type")]
    pub connection_type: String,
    /// Logical key of the local network gateway.
    ///
    /// May be omitted when exactly one local network gateway is declared.
    #[serde(default)]
    pub local_network_gateway: Option<String>,
    /// Pre-shared key.
    #[serde(default)]
    pub shared_key: String,
    /// `IKEv1` or `IKEv2`.
    #[serde(default = "default_connection_protocol")]
    pub connection_protocol: String,
    /// Custom IPsec/IKE policy.
    #[serde(default)]
    pub ipsec_policy: Option<IpsecPolicy>,
}

/// Cryptographic algorithms for a connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IpsecPolicy {
    /// IKE phase 1 DH group.
    pub dh_group: String,
    /// IKE phase 1 encryption.
    pub ike_encryption: String,
    /// IKE phase 1 integrity.
    pub ike_integrity: String,
    /// IPsec phase 2 encryption.
    pub ipsec_encryption: String,
    /// IPsec phase 2 integrity.
    pub ipsec_integrity: String,
    /// IPsec phase 2 PFS group.
    pub pfs_group: String,
}

/// Convergence engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Attempts per node before giving up on transient failures.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay in milliseconds.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Retry delay cap in milliseconds.
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
    /// First poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Poll interval cap in milliseconds.
    #[serde(default = "default_poll_max_interval_ms")]
    pub poll_max_interval_ms: u64,
    /// Total time to wait for a resource to finish provisioning.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Jitter factor in percent of each delay.
    #[serde(default = "default_jitter_percent")]
    pub jitter_percent: u8,
}

/// Local state file settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateConfig {
    /// State directory (defaults to `.halldyll` next to the config file).
    #[serde(default)]
    pub path: Option<String>,
}

// Default value functions

const fn default_max_attempts() -> u32 {
    3
}

const fn default_retry_base_ms() -> u64 {
    2_000
}

const fn default_retry_max_ms() -> u64 {
    60_000
}

const fn default_poll_interval_ms() -> u64 {
    5_000
}

const fn default_poll_max_interval_ms() -> u64 {
    30_000
}

// Gateways routinely take 30-45 minutes.
const fn default_poll_timeout_secs() -> u64 {
    3_600
}

const fn default_jitter_percent() -> u8 {
    20
}

fn default_environment() -> String {
    String::from("dev")
}

fn default_sku() -> String {
    String::from("VpnGw1")
}

fn default_allocation_method() -> String {
    String::from("Static")
}

fn default_public_ip_sku() -> String {
    String::from("Standard")
}

fn default_private_allocation() -> String {
    String::from("Dynamic")
}

fn default_connection_type() -> String {
    String::from("IPsec")
}

fn default_connection_protocol() -> String {
    String::from("IKEv2")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_max_interval_ms: default_poll_max_interval_ms(),
            poll_timeout_secs: default_poll_timeout_secs(),
            jitter_percent: default_jitter_percent(),
        }
    }
}

impl std::fmt::Display for VpnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RouteBased => write!(f, "RouteBased"),
            Self::PolicyBased => write!(f, "PolicyBased"),
        }
    }
}

impl DeployConfig {
    /// Returns the ASN the gateway will use, if BGP is enabled.
    #[must_use]
    pub fn effective_bgp_asn(&self) -> Option<u32> {
        self.enable_bgp
            .then(|| self.bgp_asn.unwrap_or(DEFAULT_BGP_ASN))
    }

    /// Returns the name of the gateway NSG, if one is declared.
    #[must_use]
    pub fn gateway_nsg_name(&self) -> Option<String> {
        self.create_gateway_nsg
            .then(|| format!("nsg-gateway-{}", self.vpn_gateway_name))
    }

    /// Returns the project tags merged with the environment tag.
    #[must_use]
    pub fn merged_tags(&self) -> BTreeMap<String, String> {
        let mut tags = self.tags.clone();
        tags.entry(String::from("environment"))
            .or_insert_with(|| self.environment.clone());
        tags
    }

    /// Returns public IP resource names in declaration order.
    #[must_use]
    pub fn public_ip_names(&self) -> Vec<&str> {
        self.public_ip_configurations
            .values()
            .map(|p| p.name.as_str())
            .collect()
    }
}

impl IpsecPolicy {
    /// Returns the policy as `(field, value)` pairs.
    #[must_use]
    pub fn fields(&self) -> [(&'static str, &str); 6] {
        [
            ("dh_group", &self.dh_group),
            ("ike_encryption", &self.ike_encryption),
            ("ike_integrity", &self.ike_integrity),
            ("ipsec_encryption", &self.ipsec_encryption),
            ("ipsec_integrity", &self.ipsec_integrity),
            ("pfs_group", &self.pfs_group),
        ]
    }
}
