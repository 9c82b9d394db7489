//! Configuration validation for VPN gateway deployments.
//!
//! This module checks values and cross-field consistency before any graph
//! is built. Reference resolution and duplicate keys are left to the graph
//! model, which owns those invariants.

use crate::error::{ConfigError, Result, VpnError};
use std::collections::HashSet;
use std::net::IpAddr;
use tracing::debug;

use super::spec::{DeployConfig, IpsecPolicy, PublicIpConfig, VpnConnectionConfig};

/// Gateway SKUs accepted by Azure.
const KNOWN_GATEWAY_SKUS: &[&str] = &[
    "Basic", "VpnGw1", "VpnGw2", "VpnGw3", "VpnGw4", "VpnGw5", "VpnGw1AZ", "VpnGw2AZ",
    "VpnGw3AZ", "VpnGw4AZ", "VpnGw5AZ",
];

/// ASNs Azure reserves for its own use.
// 65515 is Azure's own gateway default and stays allowed.
const RESERVED_ASNS: &[u32] = &[23456, 65517, 65518, 65519, 65520];

const DH_GROUPS: &[&str] = &[
    "None", "DHGroup1", "DHGroup2", "DHGroup14", "DHGroup2048", "DHGroup24", "ECP256", "ECP384",
];
const IKE_ENCRYPTIONS: &[&str] = &[
    "DES", "DES3", "AES128", "AES192", "AES256", "GCMAES128", "GCMAES256",
];
const IKE_INTEGRITIES: &[&str] = &["MD5", "SHA1", "SHA256", "SHA384", "GCMAES128", "GCMAES256"];
const IPSEC_ENCRYPTIONS: &[&str] = &[
    "None", "DES", "DES3", "AES128", "AES192", "AES256", "GCMAES128", "GCMAES192", "GCMAES256",
];
const IPSEC_INTEGRITIES: &[&str] = &[
    "MD5", "SHA1", "SHA256", "GCMAES128", "GCMAES192", "GCMAES256",
];
const PFS_GROUPS: &[&str] = &[
    "None", "PFS1", "PFS2", "PFS2048", "PFS14", "PFS24", "PFSMM", "ECP256", "ECP384",
];

/// Validator for deployment configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a deployment configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any were found.
    pub fn validate(&self, config: &DeployConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(VpnError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, config: &DeployConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_identity(config, &mut result);
        Self::validate_gateway(config, &mut result);
        Self::validate_public_ips(config, &mut result);
        Self::validate_ip_configurations(config, &mut result);
        Self::validate_local_network_gateways(config, &mut result);
        Self::validate_connections(config, &mut result);
        Self::validate_engine(config, &mut result);

        result
    }

    fn validate_identity(config: &DeployConfig, result: &mut ValidationResult) {
        if config.resource_group_name.trim().is_empty() {
            result.error("resource_group_name", "Resource group name cannot be empty");
        }

        if config.location.trim().is_empty() {
            result.error("location", "Location cannot be empty");
        }

        if !is_valid_resource_name(&config.vpn_gateway_name) {
            result.error(
                "vpn_gateway_name",
                format!(
                    "Gateway name '{}' is invalid. Use 1-80 letters, digits, '-', '_' or '.'.",
                    config.vpn_gateway_name
                ),
            );
        }
    }

    fn validate_gateway(config: &DeployConfig, result: &mut ValidationResult) {
        if !KNOWN_GATEWAY_SKUS.contains(&config.sku.as_str()) {
            result.warnings.push(format!(
                "sku: Unknown gateway SKU '{}'. This may fail at provisioning time.",
                config.sku
            ));
        }

        if config.sku == "Basic" && (config.enable_bgp || config.active_active) {
            result.error(
                "sku",
                "The Basic SKU supports neither BGP nor active-active mode",
            );
        }

        if config.active_active {
            if config.ip_configurations.len() < 2 {
                result.error(
                    "ip_configurations",
                    "Active-active mode requires two IP configurations",
                );
            }
            if config.public_ip_configurations.len() < 2 {
                result.error(
                    "public_ip_configurations",
                    "Active-active mode requires two public IP addresses",
                );
            }
        }

        match (config.enable_bgp, config.bgp_asn) {
            (true, Some(asn)) if asn == 0 || RESERVED_ASNS.contains(&asn) => {
                result.error("bgp_asn", format!("ASN {asn} is reserved"));
            }
            (false, Some(asn)) => {
                result
                    .warnings
                    .push(format!("bgp_asn: ASN {asn} is ignored because enable_bgp is false"));
            }
            _ => {}
        }

        if config.ip_configurations.is_empty() {
            result.error(
                "ip_configurations",
                "At least one gateway IP configuration is required",
            );
        }
    }

    fn validate_public_ips(config: &DeployConfig, result: &mut ValidationResult) {
        let mut seen_names = HashSet::new();

        for (key, pip) in &config.public_ip_configurations {
            let prefix = format!("public_ip_configurations.{key}");

            if !seen_names.insert(pip.name.as_str()) {
                result.error(
                    format!("{prefix}.name"),
                    format!("Duplicate public IP name: {}", pip.name),
                );
            }

            if !is_valid_resource_name(&pip.name) {
                result.error(
                    format!("{prefix}.name"),
                    format!("Public IP name '{}' is invalid", pip.name),
                );
            }

            Self::validate_public_ip_sku(pip, &prefix, result);
        }
    }

    fn validate_public_ip_sku(pip: &PublicIpConfig, prefix: &str, result: &mut ValidationResult) {
        if !matches!(pip.allocation_method.as_str(), "Static" | "Dynamic") {
            result.error(
                format!("{prefix}.allocation_method"),
                format!(
                    "Allocation method must be Static or Dynamic, got '{}'",
                    pip.allocation_method
                ),
            );
        }

        match pip.sku.as_str() {
            "Standard" => {
                if pip.allocation_method == "Dynamic" {
                    result.error(
                        format!("{prefix}.allocation_method"),
                        "Standard public IPs must use Static allocation",
                    );
                }
            }
            "Basic" => {
                if !pip.zones.is_empty() {
                    result.error(
                        format!("{prefix}.zones"),
                        "Basic public IPs cannot be zonal",
                    );
                }
            }
            other => result.error(
                format!("{prefix}.sku"),
                format!("Public IP SKU must be Standard or Basic, got '{other}'"),
            ),
        }
    }

    fn validate_ip_configurations(config: &DeployConfig, result: &mut ValidationResult) {
        for (i, ip_config) in config.ip_configurations.iter().enumerate() {
            let prefix = format!("ip_configurations[{i}]");

            if ip_config.name.trim().is_empty() {
                result.error(format!("{prefix}.name"), "IP configuration name cannot be empty");
            }

            if ip_config.public_ip.is_none() && i >= config.public_ip_configurations.len() {
                result.error(
                    format!("{prefix}.public_ip"),
                    format!("No public IP declared at position {i} to bind implicitly"),
                );
            }

            if ip_config.subnet_id.is_empty() {
                result.warnings.push(format!(
                    "{prefix}.subnet_id: No GatewaySubnet ID set; Azure will reject the gateway"
                ));
            }
        }
    }

    fn validate_local_network_gateways(config: &DeployConfig, result: &mut ValidationResult) {
        for (key, lng) in &config.local_network_gateways {
            let prefix = format!("local_network_gateways.{key}");

            if !is_valid_resource_name(&lng.name) {
                result.error(
                    format!("{prefix}.name"),
                    format!("Local network gateway name '{}' is invalid", lng.name),
                );
            }

            if lng.gateway_address.parse::<IpAddr>().is_err() {
                result.error(
                    format!("{prefix}.gateway_address"),
                    format!("'{}' is not an IP address", lng.gateway_address),
                );
            }

            if lng.address_space.is_empty() && !config.enable_bgp {
                result.warnings.push(format!(
                    "{prefix}.address_space: Empty address space without BGP routes no traffic"
                ));
            }

            for (i, prefix_cidr) in lng.address_space.iter().enumerate() {
                if !is_valid_cidr(prefix_cidr) {
                    result.error(
                        format!("{prefix}.address_space[{i}]"),
                        format!("'{prefix_cidr}' is not a CIDR prefix"),
                    );
                }
            }
        }
    }

    fn validate_connections(config: &DeployConfig, result: &mut ValidationResult) {
        for (key, connection) in &config.vpn_connections {
            let prefix = format!("vpn_connections.{key}");
            Self::validate_connection(connection, &prefix, config, result);
        }
    }

    fn validate_connection(
        connection: &VpnConnectionConfig,
        prefix: &str,
        config: &DeployConfig,
        result: &mut ValidationResult,
    ) {
        if !is_valid_resource_name(&connection.name) {
            result.error(
                format!("{prefix}.name"),
                format!("Connection name '{}' is invalid", connection.name),
            );
        }

        if connection.connection_type != "IPsec" {
            result.error(
                format!("{prefix}.type"),
                format!(
                    "Only IPsec site-to-site connections are supported, got '{}'",
                    connection.connection_type
                ),
            );
        }

        if connection.shared_key.is_empty() {
            result.error(format!("{prefix}.shared_key"), "IPsec connections need a shared key");
        }

        if !matches!(connection.connection_protocol.as_str(), "IKEv1" | "IKEv2") {
            result.error(
                format!("{prefix}.connection_protocol"),
                format!(
                    "Connection protocol must be IKEv1 or IKEv2, got '{}'",
                    connection.connection_protocol
                ),
            );
        }

        if connection.local_network_gateway.is_none() && config.local_network_gateways.len() != 1 {
            result.error(
                format!("{prefix}.local_network_gateway"),
                "local_network_gateway is required unless exactly one is declared",
            );
        }

        if let Some(policy) = &connection.ipsec_policy {
            Self::validate_ipsec_policy(policy, prefix, result);
        }
    }

    fn validate_ipsec_policy(policy: &IpsecPolicy, prefix: &str, result: &mut ValidationResult) {
        let allowed: [&[&str]; 6] = [
            DH_GROUPS,
            IKE_ENCRYPTIONS,
            IKE_INTEGRITIES,
            IPSEC_ENCRYPTIONS,
            IPSEC_INTEGRITIES,
            PFS_GROUPS,
        ];

        for ((field, value), allowed) in policy.fields().into_iter().zip(allowed) {
            if !allowed.contains(&value) {
                result.error(
                    format!("{prefix}.ipsec_policy.{field}"),
                    format!("'{value}' is not a supported {field}"),
                );
            }
        }
    }

    fn validate_engine(config: &DeployConfig, result: &mut ValidationResult) {
        let engine = &config.engine;

        if engine.max_attempts == 0 {
            result.error("engine.max_attempts", "At least one attempt is required");
        }

        if engine.retry_base_ms > engine.retry_max_ms {
            result.error("engine.retry_base_ms", "Retry base delay exceeds the retry cap");
        }

        if engine.poll_interval_ms > engine.poll_max_interval_ms {
            result.error(
                "engine.poll_interval_ms",
                "Poll interval exceeds the poll interval cap",
            );
        }

        if engine.jitter_percent > 100 {
            result.error("engine.jitter_percent", "Jitter must be between 0 and 100");
        }
    }
}

/// Validates an Azure resource name: 1-80 characters of letters, digits,
/// `-`, `_` or `.`, starting with an alphanumeric and not ending with `.` or `-`.
fn is_valid_resource_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 80 {
        return false;
    }

    if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return false;
    }

    if name.ends_with('.') || name.ends_with('-') {
        return false;
    }

    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Returns true for `address/prefix` with a prefix length valid for the family.
fn is_valid_cidr(value: &str) -> bool {
    let Some((address, prefix)) = value.split_once('/') else {
        return false;
    };

    let Ok(prefix) = prefix.parse::<u8>() else {
        return false;
    };

    match address.parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => prefix <= 32,
        Ok(IpAddr::V6(_)) => prefix <= 128,
        Err(_) => false,
    }
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn parse(yaml: &str) -> DeployConfig {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    const BASE: &str = r"
resource_group_name: rg
location: East US
vpn_gateway_name: vpn-gw
public_ip_configurations:
  pip1:
    name: pip-vpn-gw-1
ip_configurations:
  - name: vnetGatewayConfig
    subnet_id: /subnets/GatewaySubnet
";

    fn fields(result: &ValidationResult) -> Vec<&str> {
        result.errors.iter().map(|e| e.field.as_str()).collect()
    }

    #[test]
    fn test_valid_resource_name() {
        assert!(is_valid_resource_name("vpn-gw-test"));
        assert!(is_valid_resource_name("vnetGatewayConfig"));
        assert!(is_valid_resource_name("pip_1.a"));
        assert!(!is_valid_resource_name(""));
        assert!(!is_valid_resource_name("-gw"));
        assert!(!is_valid_resource_name("gw."));
        assert!(!is_valid_resource_name("gw/1"));
    }

    #[test]
    fn test_cidr() {
        assert!(is_valid_cidr("10.0.0.0/16"));
        assert!(is_valid_cidr("fd00::/8"));
        assert!(!is_valid_cidr("10.0.0.0/33"));
        assert!(!is_valid_cidr("10.0.0.0"));
        assert!(!is_valid_cidr("ten/8"));
    }

    #[test]
    fn test_base_config_is_valid() {
        let result = ConfigValidator::new().check(&parse(BASE));
        assert!(result.is_valid(), "{:?}", result.errors);
    }

    #[test]
    fn test_active_active_needs_two_of_everything() {
        let mut config = parse(BASE);
        config.active_active = true;
        let result = ConfigValidator::new().check(&config);
        assert_eq!(fields(&result), vec!["ip_configurations", "public_ip_configurations"]);
    }

    #[test]
    fn test_reserved_asn_rejected() {
        let mut config = parse(BASE);
        config.enable_bgp = true;
        config.bgp_asn = Some(65517);
        assert!(ConfigValidator::new().validate(&config).is_err());

        config.bgp_asn = Some(65001);
        assert!(ConfigValidator::new().validate(&config).is_ok());
    }

    #[test]
    fn test_default_gateway_asn_is_accepted() {
        let mut config = parse(BASE);
        config.enable_bgp = true;
        config.bgp_asn = None;
        assert!(ConfigValidator::new().validate(&config).is_ok());
        assert_eq!(config.effective_bgp_asn(), Some(crate::config::DEFAULT_BGP_ASN));

        config.bgp_asn = config.effective_bgp_asn();
        assert!(ConfigValidator::new().validate(&config).is_ok());
    }

    #[test]
    fn test_standard_sku_requires_static() {
        let mut config = parse(BASE);
        if let Some(pip) = config.public_ip_configurations.get_mut("pip1") {
            pip.allocation_method = String::from("Dynamic");
        }
        let result = ConfigValidator::new().check(&config);
        assert_eq!(fields(&result), vec!["public_ip_configurations.pip1.allocation_method"]);
    }

    #[test]
    fn test_connection_checks() {
        let yaml = format!(
            "{BASE}
local_network_gateways:
  onprem:
    name: lng-onprem
    gateway_address: 203.0.113.1
    address_space: [\"10.0.0.0/16\"]
vpn_connections:
  c1:
    name: vpn-conn-1
    shared_key: ''
    ipsec_policy:
      dh_group: DHGroup14
      ike_encryption: AES256
      ike_integrity: SHA256
      ipsec_encryption: AES256
      ipsec_integrity: SHA256
      pfs_group: PFS99
"
        );
        let result = ConfigValidator::new().check(&parse(&yaml));
        assert_eq!(
            fields(&result),
            vec![
                "vpn_connections.c1.shared_key",
                "vpn_connections.c1.ipsec_policy.pfs_group"
            ]
        );
    }

    #[test]
    fn test_bad_gateway_address() {
        let yaml = format!(
            "{BASE}
local_network_gateways:
  onprem:
    name: lng-onprem
    gateway_address: not-an-ip
    address_space: [\"10.0.0.0/16\"]
"
        );
        let result = ConfigValidator::new().check(&parse(&yaml));
        assert_eq!(fields(&result), vec!["local_network_gateways.onprem.gateway_address"]);
    }
}
