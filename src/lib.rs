// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Halldyll VPN Gateway
//!
//! A declarative, idempotent provisioning orchestrator for Azure VPN gateways.
//!
//! ## Overview
//!
//! The declared topology (public IPs, gateway IP configurations, an optional
//! gateway NSG, the gateway itself, local network gateways and site-to-site
//! connections) is turned into a typed resource graph and converged against
//! the control plane:
//!
//! - Resources are ordered into dependency waves; siblings run concurrently
//! - Every node is read before it is written, so re-runs issue no writes
//! - Transient provider errors are retried with backoff and jitter
//! - A failed wave stops every later wave
//! - Created handles are recorded so `outputs` and `destroy` work later
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing, validation and hashing
//! - [`graph`]: Typed resource graph and its builder
//! - [`planner`]: Wave ordering and live diffs
//! - [`provider`]: Azure Resource Manager client and a simulated control plane
//! - [`engine`]: Convergence and teardown engines
//! - [`outputs`]: Output projection from a converged graph
//! - [`verifier`]: Read-only live verification
//! - [`state`]: State persistence between runs
//! - [`orchestrator`]: Command flows shared by the CLI and tests
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! resource_group_name: rg-network
//! location: westeurope
//! vpn_gateway_name: vpn-gw-hub
//! sku: VpnGw2
//! enable_bgp: true
//! bgp_asn: 65010
//!
//! public_ip_configurations:
//!   primary:
//!     name: pip-vpn-gw-1
//!
//! ip_configurations:
//!   - name: default
//!     public_ip: primary
//!     subnet_id: /subscriptions/.../subnets/GatewaySubnet
//!
//! local_network_gateways:
//!   onprem:
//!     name: lng-onprem
//!     gateway_address: 203.0.113.10
//!     address_space: ["10.10.0.0/16"]
//!
//! vpn_connections:
//!   site1:
//!     name: cn-onprem
//!     local_network_gateway: onprem
//!     shared_key: ${VPN_SHARED_KEY}
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod outputs;
pub mod planner;
pub mod provider;
pub mod state;
pub mod verifier;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, DeployConfig};
pub use engine::{ConvergenceEngine, RunReport, TeardownEngine, TeardownReport};
pub use error::{Result, VpnError};
pub use graph::{GraphBuilder, NodeId, ResourceGraph, ResourceKind};
pub use orchestrator::{ApplyResult, Orchestrator};
pub use outputs::{OutputMap, OutputProjector};
pub use planner::{DependencyResolver, DeploymentPlan, DiffEngine, ExecutionPlan};
pub use provider::{AzureProvider, Provider, SimulatedProvider};
pub use state::{DeploymentState, LocalStateStore, StateStore};
pub use verifier::{LiveValidator, VerificationReport};
