//! Configuration hashing for change detection.
//!
//! This module provides deterministic hashing of configuration structures
//! so runs can be compared in state history.

use sha2::{Digest, Sha256};

use super::spec::DeployConfig;

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire deployment configuration.
    ///
    /// Engine and state settings are excluded; they do not describe resources.
    #[must_use]
    pub fn hash_config(&self, config: &DeployConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.resource_group_name.as_bytes());
        hasher.update(config.location.as_bytes());
        hasher.update(config.environment.as_bytes());
        hasher.update(config.vpn_gateway_name.as_bytes());
        hasher.update(config.sku.as_bytes());
        hasher.update(config.vpn_type.to_string().as_bytes());
        hasher.update([
            u8::from(config.active_active),
            u8::from(config.enable_bgp),
            u8::from(config.create_gateway_nsg),
        ]);
        if let Some(asn) = config.effective_bgp_asn() {
            hasher.update(asn.to_be_bytes());
        }

        // BTreeMap iteration is already sorted
        for (key, value) in &config.tags {
            hasher.update(key.as_bytes());
            hasher.update(value.as_bytes());
        }

        // Declaration order is significant for public IPs and IP configurations
        for (key, pip) in &config.public_ip_configurations {
            hasher.update(key.as_bytes());
            hasher.update(pip.name.as_bytes());
            hasher.update(pip.allocation_method.as_bytes());
            hasher.update(pip.sku.as_bytes());
            for zone in &pip.zones {
                hasher.update(zone.as_bytes());
            }
        }

        for ip_config in &config.ip_configurations {
            hasher.update(ip_config.name.as_bytes());
            hasher.update(ip_config.public_ip.as_deref().unwrap_or_default().as_bytes());
            hasher.update(ip_config.private_ip_address_allocation.as_bytes());
            hasher.update(ip_config.subnet_id.as_bytes());
        }

        let mut gateways: Vec<_> = config.local_network_gateways.iter().collect();
        gateways.sort_by(|a, b| a.0.cmp(b.0));
        for (key, lng) in gateways {
            hasher.update(key.as_bytes());
            hasher.update(lng.name.as_bytes());
            hasher.update(lng.gateway_address.as_bytes());
            for prefix in &lng.address_space {
                hasher.update(prefix.as_bytes());
            }
        }

        let mut connections: Vec<_> = config.vpn_connections.iter().collect();
        connections.sort_by(|a, b| a.0.cmp(b.0));
        for (key, connection) in connections {
            hasher.update(key.as_bytes());
            hasher.update(connection.name.as_bytes());
            hasher.update(connection.connection_type.as_bytes());
            hasher.update(
                connection
                    .local_network_gateway
                    .as_deref()
                    .unwrap_or_default()
                    .as_bytes(),
            );
            hasher.update(connection.shared_key.as_bytes());
            hasher.update(connection.connection_protocol.as_bytes());
            if let Some(policy) = &connection.ipsec_policy {
                for (_, value) in policy.fields() {
                    hasher.update(value.as_bytes());
                }
            }
        }

        hex::encode(hasher.finalize())
    }

    /// Returns a short version of a hash for display.
    #[must_use]
    pub fn short_hash(hash: &str) -> &str {
        &hash[..hash.len().min(8)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    const YAML: &str = r"
resource_group_name: rg
location: East US
vpn_gateway_name: vpn-gw
public_ip_configurations:
  pip1:
    name: pip-vpn-gw-1
ip_configurations:
  - name: vnetGatewayConfig
";

    #[test]
    fn test_hash_deterministic() {
        let config = ConfigParser::new().parse_yaml(YAML, None).unwrap();
        let hasher = ConfigHasher::new();
        assert_eq!(hasher.hash_config(&config), hasher.hash_config(&config));
    }

    #[test]
    fn test_hash_changes_with_bgp() {
        let config = ConfigParser::new().parse_yaml(YAML, None).unwrap();
        let mut changed = config.clone();
        changed.enable_bgp = true;

        let hasher = ConfigHasher::new();
        assert_ne!(hasher.hash_config(&config), hasher.hash_config(&changed));
    }

    #[test]
    fn test_hash_ignores_engine_tuning() {
        let config = ConfigParser::new().parse_yaml(YAML, None).unwrap();
        let mut tuned = config.clone();
        tuned.engine.max_attempts = 9;

        let hasher = ConfigHasher::new();
        assert_eq!(hasher.hash_config(&config), hasher.hash_config(&tuned));
    }

    #[test]
    fn test_short_hash() {
        assert_eq!(ConfigHasher::short_hash("abcdef0123456789"), "abcdef01");
        assert_eq!(ConfigHasher::short_hash("abc"), "abc");
    }
}
