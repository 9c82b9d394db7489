//! Live verification of a deployment.
//!
//! Re-reads every resource and checks it against the declared configuration.
//! Read-only: never issues writes.

use colored::Colorize;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DeployConfig;
use crate::engine::Retrier;
use crate::graph::{ResourceGraph, ResourceKind, ResourceNode};
use crate::outputs::OutputMap;
use crate::planner::DiffEngine;
use crate::provider::{LiveResource, Provider, ProvisioningState};

/// One verification check.
#[derive(Debug, Clone, Serialize)]
pub struct Check {
    /// Resource the check applies to (`kind/key`, or `outputs`).
    pub resource: String,
    /// Check name.
    pub name: String,
    /// Whether the check passed.
    pub passed: bool,
    /// Expected value.
    pub expected: String,
    /// Observed value.
    pub actual: String,
}

/// Result of verifying a deployment.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationReport {
    /// Every check, in resource declaration order.
    pub checks: Vec<Check>,
}

impl VerificationReport {
    /// Returns true if every check passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// Returns the failed checks.
    #[must_use]
    pub fn failures(&self) -> Vec<&Check> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }

    /// Returns the check with a given resource and name.
    #[must_use]
    pub fn find(&self, resource: &str, name: &str) -> Option<&Check> {
        self.checks
            .iter()
            .find(|c| c.resource == resource && c.name == name)
    }

    fn record(&mut self, resource: &str, name: &str, passed: bool, expected: String, actual: String) {
        if !passed {
            warn!("{} {}: expected {}, found {}", resource, name, expected, actual);
        }
        self.checks.push(Check {
            resource: resource.to_string(),
            name: name.to_string(),
            passed,
            expected,
            actual,
        });
    }

    fn expect_value(&mut self, resource: &str, name: &str, expected: &Value, live: Option<&Value>) {
        let actual = live.cloned().unwrap_or(Value::Null);
        let passed = &actual == expected;
        self.record(resource, name, passed, render(expected), render(&actual));
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for check in &self.checks {
            let mark = if check.passed { "✓".green() } else { "✗".red() };
            write!(f, "{mark} {} {}", check.resource, check.name)?;
            if !check.passed {
                write!(f, " (expected {}, found {})", check.expected, check.actual)?;
            }
            writeln!(f)?;
        }
        write!(
            f,
            "{}/{} checks passed",
            self.checks.len() - self.failures().len(),
            self.checks.len()
        )
    }
}

/// Checks live resources against the declared configuration.
pub struct LiveValidator {
    provider: Arc<dyn Provider>,
    retrier: Retrier,
}

impl LiveValidator {
    /// Creates a validator that reads through `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>, config: &DeployConfig) -> Self {
        Self {
            provider,
            retrier: Retrier::new(&config.engine, CancellationToken::new()),
        }
    }

    /// Verifies every node of the graph.
    ///
    /// Provider failures are reported as failed `exists` checks.
    pub async fn verify(&self, graph: &ResourceGraph, config: &DeployConfig) -> VerificationReport {
        let mut report = VerificationReport::default();

        for node in graph.nodes() {
            let resource = node.id.to_string();
            let mut calls = 0;
            let live = self
                .retrier
                .call(&resource, &mut calls, || self.provider.get(node.kind(), &node.name))
                .await;

            let live = match live {
                Ok(Some(live)) => live,
                Ok(None) => {
                    report.record(&resource, "exists", false, node.name.clone(), String::from("not found"));
                    continue;
                }
                Err(failure) => {
                    report.record(&resource, "exists", false, node.name.clone(), failure.message);
                    continue;
                }
            };

            debug!("Verifying {}", resource);
            report.record(&resource, "exists", true, node.name.clone(), live.name.clone());
            report.record(
                &resource,
                "provisioning_state",
                live.provisioning_state == ProvisioningState::Succeeded,
                ProvisioningState::Succeeded.to_string(),
                live.provisioning_state.to_string(),
            );

            let diff = DiffEngine::new().diff_node(node, Some(&live));
            let drifted: Vec<String> = diff
                .details
                .iter()
                .filter(|d| d.field != "provisioning_state")
                .map(|d| d.field.clone())
                .collect();
            report.record(
                &resource,
                "properties",
                drifted.is_empty(),
                String::from("declared"),
                if drifted.is_empty() {
                    String::from("declared")
                } else {
                    format!("drifted: {}", drifted.join(", "))
                },
            );

            Self::check_kind(&mut report, &resource, node, &live, config);
        }

        info!(
            "Verification finished: {}/{} checks passed",
            report.checks.len() - report.failures().len(),
            report.checks.len()
        );
        report
    }

    fn check_kind(
        report: &mut VerificationReport,
        resource: &str,
        node: &ResourceNode,
        live: &LiveResource,
        config: &DeployConfig,
    ) {
        let props = &live.properties;
        match node.kind() {
            ResourceKind::VpnGateway => {
                report.expect_value(resource, "sku", &json!(config.sku), props.get("sku"));
                report.expect_value(
                    resource,
                    "vpn_type",
                    &json!(config.vpn_type.to_string()),
                    props.get("vpn_type"),
                );
                report.expect_value(resource, "enable_bgp", &json!(config.enable_bgp), props.get("enable_bgp"));
                report.expect_value(
                    resource,
                    "active_active",
                    &json!(config.active_active),
                    props.get("active_active"),
                );
                if let Some(asn) = config.effective_bgp_asn() {
                    report.expect_value(resource, "bgp_asn", &json!(asn), props.get("bgp_asn"));
                }
            }
            ResourceKind::PublicIp => {
                if let Some(pip) = config.public_ip_configurations.get(node.key()) {
                    report.expect_value(resource, "sku", &json!(pip.sku), props.get("sku"));
                    report.expect_value(
                        resource,
                        "allocation_method",
                        &json!(pip.allocation_method),
                        props.get("allocation_method"),
                    );
                }
            }
            ResourceKind::LocalNetworkGateway => {
                if let Some(lng) = config.local_network_gateways.get(node.key()) {
                    report.expect_value(
                        resource,
                        "gateway_address",
                        &json!(lng.gateway_address),
                        props.get("gateway_address"),
                    );
                }
            }
            ResourceKind::Nsg => {
                report.record(
                    resource,
                    "name",
                    live.name.contains("nsg-gateway"),
                    String::from("contains nsg-gateway"),
                    live.name.clone(),
                );
            }
            ResourceKind::GatewayIpConfig | ResourceKind::VpnConnection => {}
        }
    }

    /// Checks projected outputs for completeness.
    pub fn verify_outputs(report: &mut VerificationReport, outputs: &OutputMap) {
        report.record(
            "outputs",
            "vpn_gateway_id",
            outputs
                .vpn_gateway_id
                .contains("Microsoft.Network/virtualNetworkGateways"),
            String::from("virtual network gateway id"),
            outputs.vpn_gateway_id.clone(),
        );
        for (name, value) in [
            ("vpn_gateway_name", &outputs.vpn_gateway_name),
            ("resource_group_name", &outputs.resource_group_name),
            ("location", &outputs.location),
        ] {
            report.record("outputs", name, !value.is_empty(), String::from("non-empty"), value.clone());
        }
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::from("<missing>"),
        other => other.to_string(),
    }
}

impl fmt::Debug for LiveValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveValidator").finish_non_exhaustive()
    }
}
