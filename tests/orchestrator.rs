//! End-to-end runs against the simulated control plane.

use std::sync::Arc;

use halldyll_vpn_gateway::config::{ConfigParser, DeployConfig};
use halldyll_vpn_gateway::engine::NodeAction;
use halldyll_vpn_gateway::error::{ProviderError, ProvisionError, VpnError};
use halldyll_vpn_gateway::graph::{NodeId, NodeState, ResourceKind};
use halldyll_vpn_gateway::orchestrator::Orchestrator;
use halldyll_vpn_gateway::provider::{Provider, SimulatedProvider};
use halldyll_vpn_gateway::state::{LocalStateStore, StateStore};
use serde_json::json;
use tempfile::TempDir;

const ENGINE: &str = r"
engine:
  max_attempts: 3
  retry_base_ms: 1
  retry_max_ms: 2
  poll_interval_ms: 1
  poll_max_interval_ms: 2
  poll_timeout_secs: 5
  jitter_percent: 0
";

const BASIC: &str = r"
resource_group_name: rg-vpn
location: eastus
vpn_gateway_name: vpn-gw
create_gateway_nsg: true
public_ip_configurations:
  pip1:
    name: pip-vpn-gw-1
ip_configurations:
  - name: vnetGatewayConfig
    subnet_id: /subnets/GatewaySubnet
local_network_gateways:
  onprem:
    name: lng-onprem
    gateway_address: 203.0.113.10
    address_space: ['10.10.0.0/16']
vpn_connections:
  site1:
    name: cn-onprem
    shared_key: s3cret
";

const ACTIVE_ACTIVE: &str = r"
resource_group_name: rg-vpn
location: eastus
vpn_gateway_name: vpn-gw-aa
sku: VpnGw2
active_active: true
enable_bgp: true
bgp_asn: 65001
public_ip_configurations:
  pip1:
    name: pip-aa-1
  pip2:
    name: pip-aa-2
ip_configurations:
  - name: cfg1
    subnet_id: /subnets/GatewaySubnet
  - name: cfg2
    subnet_id: /subnets/GatewaySubnet
";

fn config(yaml: &str) -> DeployConfig {
    ConfigParser::new()
        .parse_yaml(&format!("{yaml}{ENGINE}"), None)
        .expect("config should parse")
}

fn provider() -> Arc<SimulatedProvider> {
    Arc::new(SimulatedProvider::new("sub", "rg-vpn").with_accepted_polls(1))
}

fn store(dir: &TempDir) -> LocalStateStore {
    LocalStateStore::for_deployment(dir.path().join(".halldyll"), "rg-vpn", "vpn-gw")
}

#[tokio::test]
async fn test_basic_gateway_converges_with_single_public_ip() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let sim = provider();
    let config = config(BASIC);

    let result = Orchestrator::new(&config, &store, sim.clone())
        .apply()
        .await
        .unwrap();

    assert!(result.report.is_success(), "{}", result.report.summary());
    let outputs = result.outputs.expect("converged run has outputs");
    assert_eq!(outputs.public_ip_names, vec!["pip-vpn-gw-1"]);
    assert_eq!(outputs.gateway_nsg_name, "nsg-gateway-vpn-gw");
    assert_eq!(outputs.vpn_connection_names, vec!["cn-onprem"]);
    assert!(outputs
        .vpn_gateway_id
        .ends_with("Microsoft.Network/virtualNetworkGateways/vpn-gw"));

    let gateway = sim
        .get(ResourceKind::VpnGateway, "vpn-gw")
        .await
        .unwrap()
        .expect("gateway exists");
    assert_eq!(gateway.properties["enable_bgp"], json!(false));
    assert_eq!(gateway.properties["active_active"], json!(false));
    assert!(gateway.properties.get("bgp_asn").is_none());
}

#[tokio::test]
async fn test_active_active_bgp_gateway() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let sim = provider();
    let config = config(ACTIVE_ACTIVE);

    let result = Orchestrator::new(&config, &store, sim.clone())
        .apply()
        .await
        .unwrap();

    assert!(result.report.is_success());
    let outputs = result.outputs.unwrap();
    assert_eq!(outputs.public_ip_names, vec!["pip-aa-1", "pip-aa-2"]);
    assert!(outputs.gateway_nsg_name.is_empty());

    let gateway = sim
        .get(ResourceKind::VpnGateway, "vpn-gw-aa")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(gateway.properties["active_active"], json!(true));
    assert_eq!(gateway.properties["enable_bgp"], json!(true));
    assert_eq!(gateway.properties["bgp_asn"], json!(65001));
}

#[tokio::test]
async fn test_connection_is_scheduled_after_its_local_gateway() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let config = config(BASIC);

    let plan = Orchestrator::new(&config, &store, provider()).plan().await.unwrap();

    let lng = plan
        .execution
        .wave_of(&NodeId::new(ResourceKind::LocalNetworkGateway, "onprem"))
        .unwrap();
    let gateway = plan
        .execution
        .wave_of(&NodeId::new(ResourceKind::VpnGateway, "vpn-gw"))
        .unwrap();
    let connection = plan
        .execution
        .wave_of(&NodeId::new(ResourceKind::VpnConnection, "site1"))
        .unwrap();

    assert!(connection > lng);
    assert!(connection > gateway);
    assert!(plan.has_changes());
}

#[tokio::test]
async fn test_invalid_reference_fails_before_any_provider_call() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let sim = provider();
    let yaml = BASIC.replace(
        "    shared_key: s3cret",
        "    shared_key: s3cret\n    local_network_gateway: missing",
    );
    let config = config(&yaml);

    let err = Orchestrator::new(&config, &store, sim.clone())
        .apply()
        .await
        .unwrap_err();

    assert!(matches!(err, VpnError::Config(_)), "{err}");
    assert_eq!(sim.get_calls().await, 0);
    assert_eq!(sim.total_create_calls().await, 0);
    assert!(!store.exists().await.unwrap());
}

#[tokio::test]
async fn test_reapply_issues_no_writes() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let sim = provider();
    let config = config(BASIC);

    Orchestrator::new(&config, &store, sim.clone())
        .apply()
        .await
        .unwrap();
    let writes = sim.total_create_calls().await;

    let second = Orchestrator::new(&config, &store, sim.clone())
        .apply()
        .await
        .unwrap();

    assert!(second.report.is_success());
    assert_eq!(sim.total_create_calls().await, writes);
    assert_eq!(second.report.count(NodeAction::Unchanged), second.report.nodes.len());

    let plan = Orchestrator::new(&config, &store, sim).plan().await.unwrap();
    assert!(!plan.has_changes());
}

#[tokio::test]
async fn test_first_wave_failure_stops_later_waves() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let sim = provider();
    sim.fail_next(
        "pip-vpn-gw-1",
        ProviderError::QuotaExceeded {
            message: String::from("public IP quota reached"),
        },
    )
    .await;
    let config = config(BASIC);

    let result = Orchestrator::new(&config, &store, sim.clone())
        .apply()
        .await
        .unwrap();

    assert!(!result.report.is_success());
    assert!(result.outputs.is_none());
    assert_eq!(result.report.waves_dispatched, 1);
    assert!(!sim.contains(ResourceKind::VpnGateway, "vpn-gw").await);
    assert!(!sim.contains(ResourceKind::VpnConnection, "cn-onprem").await);

    let state = store.load().await.unwrap().unwrap();
    let pip = state
        .node(&NodeId::new(ResourceKind::PublicIp, "pip1"))
        .unwrap();
    assert_eq!(pip.state, NodeState::Failed);
    assert!(!state.history.last().unwrap().success);
}

#[tokio::test]
async fn test_outputs_after_apply() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let sim = provider();
    let config = config(BASIC);

    let applied = Orchestrator::new(&config, &store, sim.clone())
        .apply()
        .await
        .unwrap()
        .outputs
        .unwrap();

    let orchestrator = Orchestrator::new(&config, &store, sim);
    let outputs = orchestrator.outputs().await.unwrap();
    assert_eq!(outputs, applied);

    let report = orchestrator.verify().await;
    assert!(report.unwrap().passed());
}

#[tokio::test]
async fn test_outputs_before_apply_fail() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let config = config(BASIC);

    let err = Orchestrator::new(&config, &store, provider())
        .outputs()
        .await
        .unwrap_err();
    assert!(matches!(err, VpnError::Provision(_)), "{err}");
}

#[tokio::test]
async fn test_destroy_removes_resources_and_state() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let sim = provider();
    let config = config(BASIC);

    let orchestrator = Orchestrator::new(&config, &store, sim.clone());
    orchestrator.apply().await.unwrap();
    assert!(store.exists().await.unwrap());

    let report = orchestrator.destroy().await.unwrap();

    assert!(report.is_success(), "{}", report.summary());
    assert_eq!(sim.resource_count().await, 0);
    assert!(!store.exists().await.unwrap());
}

#[tokio::test]
async fn test_cancelled_plan_is_aborted() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let config = config(BASIC);
    let cancel = tokio_util::sync::CancellationToken::new();
    cancel.cancel();

    let err = Orchestrator::new(&config, &store, provider())
        .with_cancellation(cancel)
        .plan()
        .await
        .unwrap_err();
    assert!(
        matches!(err, VpnError::Provision(ProvisionError::Aborted { .. })),
        "{err}"
    );
}
