//! Core types of the resource graph.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Declared or live properties of a resource.
pub type Properties = BTreeMap<String, Value>;

/// The kinds of resource the orchestrator manages.
///
/// Variant order is the tie-break order used within a wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Public IP address.
    PublicIp,
    /// Network security group.
    Nsg,
    /// Gateway frontend IP configuration (child of the gateway).
    GatewayIpConfig,
    /// Virtual network gateway.
    VpnGateway,
    /// Local network gateway (remote endpoint).
    LocalNetworkGateway,
    /// Site-to-site connection.
    VpnConnection,
}

impl ResourceKind {
    /// All kinds in tie-break order.
    pub const ALL: [Self; 6] = [
        Self::PublicIp,
        Self::Nsg,
        Self::GatewayIpConfig,
        Self::VpnGateway,
        Self::LocalNetworkGateway,
        Self::VpnConnection,
    ];

    /// Returns the snake-case name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PublicIp => "public_ip",
            Self::Nsg => "nsg",
            Self::GatewayIpConfig => "gateway_ip_config",
            Self::VpnGateway => "vpn_gateway",
            Self::LocalNetworkGateway => "local_network_gateway",
            Self::VpnConnection => "vpn_connection",
        }
    }

    /// Returns the `Microsoft.Network` resource type segment.
    #[must_use]
    pub const fn arm_type(self) -> &'static str {
        match self {
            Self::PublicIp => "publicIPAddresses",
            Self::Nsg => "networkSecurityGroups",
            Self::GatewayIpConfig | Self::VpnGateway => "virtualNetworkGateways",
            Self::LocalNetworkGateway => "localNetworkGateways",
            Self::VpnConnection => "connections",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a node: kind plus logical key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Logical key, unique within the kind.
    pub key: String,
}

impl NodeId {
    /// Creates a node id.
    #[must_use]
    pub fn new(kind: ResourceKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.key)
    }
}

/// Runtime state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Not dispatched yet.
    #[default]
    Pending,
    /// A worker owns the node.
    Creating,
    /// Provisioned; a handle is attached.
    Created,
    /// Terminal failure.
    Failed,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Creating => write!(f, "creating"),
            Self::Created => write!(f, "created"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Provider-assigned identity and live attributes of a created resource.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProviderHandle {
    /// Provider resource id.
    pub id: String,
    /// Live attributes such as the allocated IP address.
    #[serde(default)]
    pub attributes: Properties,
}

impl ProviderHandle {
    /// Creates a handle with no attributes.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Properties::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns a string attribute, if present.
    #[must_use]
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// The handle as one element of a list binding: its id plus attributes.
    #[must_use]
    pub fn to_entry(&self) -> Value {
        let mut entry = serde_json::Map::new();
        entry.insert(String::from("id"), Value::String(self.id.clone()));
        entry.extend(self.attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        Value::Object(entry)
    }
}

/// The role a reference plays; determines the target kind and how the
/// referent's handle is bound into the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefRole {
    /// Frontend public IP of an IP configuration.
    PublicIp,
    /// IP configuration of a gateway.
    IpConfiguration,
    /// Security group associated with a gateway.
    NetworkSecurityGroup,
    /// Gateway side of a connection.
    VirtualNetworkGateway,
    /// Remote side of a connection.
    LocalNetworkGateway,
}

impl RefRole {
    /// The only kind this role may point at.
    #[must_use]
    pub const fn target_kind(self) -> ResourceKind {
        match self {
            Self::PublicIp => ResourceKind::PublicIp,
            Self::IpConfiguration => ResourceKind::GatewayIpConfig,
            Self::NetworkSecurityGroup => ResourceKind::Nsg,
            Self::VirtualNetworkGateway => ResourceKind::VpnGateway,
            Self::LocalNetworkGateway => ResourceKind::LocalNetworkGateway,
        }
    }

    /// The request property the referent's handle is bound to.
    ///
    /// The gateway's NSG reference binds nothing; it only orders the NSG
    /// before the gateway.
    #[must_use]
    pub const fn property_key(self) -> Option<&'static str> {
        match self {
            Self::PublicIp => Some("public_ip_address_id"),
            Self::IpConfiguration => Some("ip_configurations"),
            Self::NetworkSecurityGroup => None,
            Self::VirtualNetworkGateway => Some("virtual_network_gateway_id"),
            Self::LocalNetworkGateway => Some("local_network_gateway_id"),
        }
    }
}

/// An outgoing reference from one node to another by logical key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// Role of the reference.
    pub role: RefRole,
    /// Referenced node.
    pub target: NodeId,
}

impl Reference {
    /// Creates a reference to the node with `key` of the role's target kind.
    #[must_use]
    pub fn new(role: RefRole, key: impl Into<String>) -> Self {
        Self {
            role,
            target: NodeId::new(role.target_kind(), key),
        }
    }
}

/// Why a node ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// The provider returned a permanent error.
    Permanent,
    /// Transient errors persisted past the attempt limit.
    RetriesExhausted,
    /// The run was cancelled or the poll deadline passed.
    Cancelled,
    /// The worker task ended without reporting.
    WorkerLost,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permanent => write!(f, "permanent"),
            Self::RetriesExhausted => write!(f, "retries_exhausted"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::WorkerLost => write!(f, "worker_lost"),
        }
    }
}

/// Recorded failure of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    /// Failure cause.
    pub cause: FailureCause,
    /// Short error kind, e.g. `quota_exceeded`.
    pub error_kind: String,
    /// Human-readable message.
    pub message: String,
}

impl NodeFailure {
    /// Creates a failure record.
    #[must_use]
    pub fn new(cause: FailureCause, error_kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            cause,
            error_kind: error_kind.into(),
            message: message.into(),
        }
    }
}

/// A single resource in the graph.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    /// Kind and logical key.
    pub id: NodeId,
    /// Provider-facing resource name.
    pub name: String,
    /// Declared properties.
    pub properties: Properties,
    /// Outgoing references.
    pub references: Vec<Reference>,
    /// Runtime state.
    pub state: NodeState,
    /// Handle attached on the `Created` transition.
    pub handle: Option<ProviderHandle>,
    /// Failure recorded on the `Failed` transition.
    pub failure: Option<NodeFailure>,
}

impl ResourceNode {
    /// Returns the resource kind.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.id.kind
    }

    /// Returns the logical key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.id.key
    }

    /// Builds request properties with each resolved referent bound in.
    ///
    /// `resolved` pairs each reference role with the referent's handle, in
    /// reference order.
    #[must_use]
    pub fn bound_properties(&self, resolved: &[(RefRole, ProviderHandle)]) -> Properties {
        let mut properties = self.properties.clone();

        for (role, handle) in resolved {
            let Some(key) = role.property_key() else {
                continue;
            };

            if *role == RefRole::IpConfiguration {
                let list = properties
                    .entry(key.to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(items) = list {
                    items.push(handle.to_entry());
                }
            } else {
                properties.insert(key.to_string(), Value::String(handle.id.clone()));
            }
        }

        properties
    }
}
