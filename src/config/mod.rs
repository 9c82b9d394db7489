//! Configuration module for the VPN gateway orchestrator.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `halldyll.vpn.yaml`
//! - Validation of configuration values
//! - Computing configuration hashes for change detection

mod spec;
mod parser;
mod validator;
mod hash;

pub use spec::{
    DeployConfig, EngineConfig, IpConfiguration, IpsecPolicy, LocalNetworkGatewayConfig,
    PublicIpConfig, StateConfig, VpnConnectionConfig, VpnType, DEFAULT_BGP_ASN,
};
pub use parser::{ConfigParser, find_config_file};
pub use validator::{ConfigValidator, ValidationResult};
pub use hash::ConfigHasher;
