//! Azure Resource Manager provider.
//!
//! Talks to the ARM REST API with a bearer token. Retries are not done here;
//! the convergence engine owns retry policy.

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::ConfigParser;
use crate::error::{ProviderError, Result, VpnError};
use crate::graph::{ProviderHandle, ResourceKind};

use super::arm;
use super::arm_id;
use super::traits::{
    DeleteStatus, LiveResource, Provider, ProviderResult, ProvisionStatus, ProvisioningState,
    ResourceRequest,
};

/// Public ARM endpoint.
pub const ARM_BASE_URL: &str = "https://management.azure.com";

/// `Microsoft.Network` API version.
pub const API_VERSION: &str = "2023-09-01";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Used when a 429 carries no `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

/// Azure provider.
#[derive(Debug, Clone)]
pub struct AzureProvider {
    client: Client,
    base_url: String,
    access_token: String,
    subscription_id: String,
    resource_group: String,
}

impl AzureProvider {
    /// Creates a provider for a subscription and resource group.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(
        access_token: impl Into<String>,
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                VpnError::Provider(ProviderError::network(format!(
                    "Failed to create HTTP client: {e}"
                )))
            })?;

        Ok(Self {
            client,
            base_url: ARM_BASE_URL.to_string(),
            access_token: access_token.into(),
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
        })
    }

    /// Creates a provider from `AZURE_ACCESS_TOKEN` and `AZURE_SUBSCRIPTION_ID`.
    ///
    /// # Errors
    ///
    /// Returns an error if either variable is missing.
    pub fn from_env(resource_group: impl Into<String>) -> Result<Self> {
        let token = ConfigParser::required_env("AZURE_ACCESS_TOKEN")?;
        let subscription = ConfigParser::required_env("AZURE_SUBSCRIPTION_ID")?;
        Self::new(token, subscription, resource_group)
    }

    /// Overrides the ARM endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn resource_url(&self, kind: ResourceKind, name: &str) -> String {
        format!(
            "{}{}?api-version={API_VERSION}",
            self.base_url,
            arm_id(&self.subscription_id, &self.resource_group, kind, name)
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> ProviderResult<Response> {
        request
            .header(header::AUTHORIZATION, format!("Bearer {}", self.access_token))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout {
                        message: e.to_string(),
                    }
                } else {
                    ProviderError::network(format!("Request failed: {e}"))
                }
            })
    }

    async fn read_json(response: Response) -> ProviderResult<Value> {
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::network(format!("Failed to read body: {e}")))?;

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text)
            .map_err(|e| ProviderError::invalid_response(format!("Failed to parse response: {e}")))
    }

    async fn get_document(&self, kind: ResourceKind, name: &str) -> ProviderResult<Option<Value>> {
        let url = self.resource_url(kind, name);
        trace!("GET {}", url);

        let response = self.send(self.client.get(&url)).await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(error_from_response(response, name).await);
        }

        Self::read_json(response).await.map(Some)
    }

    fn ip_config_handle(&self, request: &ResourceRequest) -> ProviderHandle {
        let short_name = request
            .name
            .split_once('/')
            .map_or(request.name.as_str(), |(_, n)| n);

        let mut handle = ProviderHandle::new(arm_id(
            &self.subscription_id,
            &self.resource_group,
            ResourceKind::GatewayIpConfig,
            &request.name,
        ))
        .with_attribute("name", short_name);

        for key in ["public_ip_address_id", "subnet_id", "private_ip_address_allocation"] {
            if let Some(value) = request.properties.get(key) {
                handle.attributes.insert(key.to_string(), value.clone());
            }
        }
        handle
    }
}

/// Maps a non-success ARM response to a provider error.
async fn error_from_response(response: Response, name: &str) -> ProviderError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok());
    let body = response.text().await.unwrap_or_default();

    map_status(status.as_u16(), retry_after, &body, name)
}

/// Classifies an HTTP status and ARM error body.
#[must_use]
pub fn map_status(status: u16, retry_after: Option<u64>, body: &str, name: &str) -> ProviderError {
    let (code, message) = arm::error_details(body);

    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        409 if code.ends_with("InUse") || code.contains("AlreadyExists") => {
            ProviderError::NameCollision {
                name: name.to_string(),
            }
        }
        409 => ProviderError::Conflict { message },
        408 => ProviderError::Timeout { message },
        400 if code.contains("QuotaExceeded") => ProviderError::QuotaExceeded { message },
        400 => ProviderError::InvalidProperty { message },
        401 | 403 => ProviderError::Authentication { message },
        500..=599 => ProviderError::ServerError { status, message },
        _ => ProviderError::invalid_response(format!("Unexpected status {status}: {message}")),
    }
}

#[async_trait]
impl Provider for AzureProvider {
    async fn create_or_update(&self, request: &ResourceRequest) -> ProviderResult<ProvisionStatus> {
        // IP configurations are written as part of the gateway body.
        if request.kind == ResourceKind::GatewayIpConfig {
            return Ok(ProvisionStatus::Succeeded(self.ip_config_handle(request)));
        }

        let url = self.resource_url(request.kind, &request.name);
        let body = arm::to_body(request.kind, &request.properties);
        debug!("PUT {} {}", request.kind, request.name);

        let response = self.send(self.client.put(&url).json(&body)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(response, &request.name).await);
        }

        let document = Self::read_json(response).await?;
        if status == StatusCode::OK
            && arm::provisioning_state(&document) == ProvisioningState::Succeeded
        {
            let (handle, _) = arm::from_document(request.kind, &document);
            return Ok(ProvisionStatus::Succeeded(handle));
        }

        Ok(ProvisionStatus::Accepted)
    }

    async fn get(&self, kind: ResourceKind, name: &str) -> ProviderResult<Option<LiveResource>> {
        if kind == ResourceKind::GatewayIpConfig {
            let Some((gateway, ip_config)) = name.split_once('/') else {
                return Ok(None);
            };
            let Some(document) = self.get_document(ResourceKind::VpnGateway, gateway).await? else {
                return Ok(None);
            };
            return Ok(arm::ip_configuration(&document, ip_config).map(|(handle, properties)| {
                LiveResource {
                    name: name.to_string(),
                    handle,
                    properties,
                    provisioning_state: arm::provisioning_state(&document),
                }
            }));
        }

        let Some(document) = self.get_document(kind, name).await? else {
            return Ok(None);
        };

        let (handle, properties) = arm::from_document(kind, &document);
        Ok(Some(LiveResource {
            name: name.to_string(),
            handle,
            properties,
            provisioning_state: arm::provisioning_state(&document),
        }))
    }

    async fn delete(&self, kind: ResourceKind, name: &str) -> ProviderResult<DeleteStatus> {
        // Removed together with the gateway.
        if kind == ResourceKind::GatewayIpConfig {
            return Ok(DeleteStatus::Deleted);
        }

        let url = self.resource_url(kind, name);
        debug!("DELETE {} {}", kind, name);

        let response = self.send(self.client.delete(&url)).await?;
        match response.status() {
            StatusCode::OK => Ok(DeleteStatus::Deleted),
            StatusCode::ACCEPTED => Ok(DeleteStatus::Accepted),
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(DeleteStatus::NotFound),
            _ => Err(error_from_response(response, name).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::{ConvergenceEngine, NodeAction};
    use crate::graph::{GraphBuilder, NodeId, Properties};
    use crate::planner::DependencyResolver;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{header as header_matcher, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PIP_PATH: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/publicIPAddresses/pip-1";
    const GW_PATH: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/virtualNetworkGateways/vpn-gw";

    async fn provider(server: &MockServer) -> AzureProvider {
        AzureProvider::new("token", "sub", "rg")
            .unwrap()
            .with_base_url(server.uri())
    }

    fn pip_request() -> ResourceRequest {
        ResourceRequest {
            kind: ResourceKind::PublicIp,
            name: String::from("pip-1"),
            properties: Properties::from([
                (String::from("location"), json!("eastus")),
                (String::from("sku"), json!("Standard")),
                (String::from("allocation_method"), json!("Static")),
            ]),
        }
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_status(429, Some(7), "", "x"),
            ProviderError::RateLimited { retry_after_secs: 7 }
        ));
        assert!(map_status(409, None, "", "x").is_retryable());
        assert!(map_status(503, None, "", "x").is_retryable());
        assert!(map_status(408, None, "", "x").is_retryable());
        assert_eq!(
            map_status(400, None, r#"{"error":{"code":"QuotaExceeded","message":"m"}}"#, "x")
                .kind_name(),
            "quota_exceeded"
        );
        assert_eq!(map_status(400, None, "{}", "x").kind_name(), "invalid_property");
        assert_eq!(map_status(403, None, "", "x").kind_name(), "authentication");
        assert_eq!(
            map_status(409, None, r#"{"error":{"code":"PublicIPAddressInUse"}}"#, "pip").kind_name(),
            "name_collision"
        );
    }

    #[tokio::test]
    async fn test_put_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(PIP_PATH))
            .and(query_param("api-version", API_VERSION))
            .and(header_matcher("authorization", "Bearer token"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"properties": {"provisioningState": "Updating"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let status = provider(&server).await.create_or_update(&pip_request()).await.unwrap();
        assert_eq!(status, ProvisionStatus::Accepted);
    }

    #[tokio::test]
    async fn test_put_succeeded_returns_handle() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(PIP_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": PIP_PATH,
                "properties": {"provisioningState": "Succeeded", "ipAddress": "20.1.2.3"}
            })))
            .mount(&server)
            .await;

        let status = provider(&server).await.create_or_update(&pip_request()).await.unwrap();
        let ProvisionStatus::Succeeded(handle) = status else {
            panic!("expected success");
        };
        assert_eq!(handle.id, PIP_PATH);
        assert_eq!(handle.attribute_str("ip_address"), Some("20.1.2.3"));
    }

    #[tokio::test]
    async fn test_rate_limited_honours_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(PIP_PATH))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "12"))
            .mount(&server)
            .await;

        let err = provider(&server).await.create_or_update(&pip_request()).await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(PIP_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let live = provider(&server).await.get(ResourceKind::PublicIp, "pip-1").await.unwrap();
        assert!(live.is_none());
    }

    #[tokio::test]
    async fn test_get_ip_configuration_reads_gateway() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(GW_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": GW_PATH,
                "location": "eastus",
                "properties": {
                    "provisioningState": "Succeeded",
                    "ipConfigurations": [{
                        "id": format!("{GW_PATH}/ipConfigurations/cfg1"),
                        "name": "cfg1",
                        "properties": {"privateIPAllocationMethod": "Dynamic"}
                    }]
                }
            })))
            .mount(&server)
            .await;

        let live = provider(&server)
            .await
            .get(ResourceKind::GatewayIpConfig, "vpn-gw/cfg1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(live.provisioning_state, ProvisioningState::Succeeded);
        assert_eq!(live.properties["private_ip_address_allocation"], "Dynamic");
    }

    #[tokio::test]
    async fn test_ip_configuration_write_is_local() {
        let server = MockServer::start().await;
        let request = ResourceRequest {
            kind: ResourceKind::GatewayIpConfig,
            name: String::from("vpn-gw/cfg1"),
            properties: Properties::from([(String::from("public_ip_address_id"), json!("/pip"))]),
        };

        let status = provider(&server).await.create_or_update(&request).await.unwrap();
        let ProvisionStatus::Succeeded(handle) = status else {
            panic!("expected success");
        };
        assert!(handle.id.ends_with("/virtualNetworkGateways/vpn-gw/ipConfigurations/cfg1"));
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    fn live_document(kind: ResourceKind, properties: &Properties, id: &str) -> Value {
        let mut document = arm::to_body(kind, properties);
        document["id"] = json!(id);
        document["properties"]["provisioningState"] = json!("Succeeded");
        document
    }

    #[tokio::test]
    async fn test_ip_configuration_drift_rewrites_gateway() {
        let server = MockServer::start().await;
        let config = ConfigParser::new()
            .parse_yaml(
                r"
resource_group_name: rg
location: eastus
vpn_gateway_name: vpn-gw
public_ip_configurations:
  pip1:
    name: pip-1
ip_configurations:
  - name: cfg1
    subnet_id: /subnets/GatewaySubnet
",
                None,
            )
            .unwrap();
        let mut graph = GraphBuilder::from_config(&config).unwrap();
        let plan = DependencyResolver::new().resolve(&graph).unwrap();

        let pip = graph.get(&NodeId::new(ResourceKind::PublicIp, "pip1")).unwrap();
        Mock::given(method("GET"))
            .and(path(PIP_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(live_document(
                ResourceKind::PublicIp,
                &pip.properties,
                PIP_PATH,
            )))
            .mount(&server)
            .await;

        // Changed outside the orchestrator: Static on another subnet.
        let gateway_id = NodeId::new(ResourceKind::VpnGateway, "vpn-gw");
        let mut drifted = graph.get(&gateway_id).unwrap().properties.clone();
        drifted.insert(
            String::from("ip_configurations"),
            json!([{
                "name": "cfg1",
                "private_ip_address_allocation": "Static",
                "subnet_id": "/subnets/OtherSubnet",
                "public_ip_address_id": PIP_PATH
            }]),
        );
        let mut gateway_document = live_document(ResourceKind::VpnGateway, &drifted, GW_PATH);
        gateway_document["properties"]["ipConfigurations"][0]["id"] =
            json!(format!("{GW_PATH}/ipConfigurations/cfg1"));
        Mock::given(method("GET"))
            .and(path(GW_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(gateway_document))
            .mount(&server)
            .await;

        let declared = graph.get(&gateway_id).unwrap().properties.clone();
        Mock::given(method("PUT"))
            .and(path(GW_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(live_document(
                ResourceKind::VpnGateway,
                &declared,
                GW_PATH,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let engine = ConvergenceEngine::new(
            Arc::new(provider(&server).await),
            EngineConfig {
                max_attempts: 2,
                retry_base_ms: 1,
                retry_max_ms: 2,
                poll_interval_ms: 1,
                poll_max_interval_ms: 2,
                poll_timeout_secs: 5,
                jitter_percent: 0,
            },
        );
        let report = engine.converge(&mut graph, &plan).await.unwrap();

        assert!(report.is_success(), "{}", report.summary());
        let ip_config = report
            .node(&NodeId::new(ResourceKind::GatewayIpConfig, "cfg1"))
            .unwrap();
        assert_eq!(ip_config.action, NodeAction::Updated);
        let gateway = report.node(&gateway_id).unwrap();
        assert_eq!(gateway.action, NodeAction::Updated);
        assert_eq!(gateway.create_calls, 1);
        assert_eq!(
            report.node(&NodeId::new(ResourceKind::PublicIp, "pip1")).unwrap().action,
            NodeAction::Unchanged
        );

        let puts: Vec<_> = server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.as_str() == "PUT")
            .collect();
        assert_eq!(puts.len(), 1);
        let body: Value = serde_json::from_slice(&puts[0].body).unwrap();
        let sent = &body["properties"]["ipConfigurations"][0]["properties"];
        assert_eq!(sent["privateIPAllocationMethod"], "Dynamic");
        assert_eq!(sent["subnet"]["id"], "/subnets/GatewaySubnet");
        assert_eq!(sent["publicIPAddress"]["id"], PIP_PATH);
    }

    #[tokio::test]
    async fn test_delete_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(PIP_PATH))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(GW_PATH))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let azure = provider(&server).await;
        assert_eq!(
            azure.delete(ResourceKind::PublicIp, "pip-1").await.unwrap(),
            DeleteStatus::Accepted
        );
        assert_eq!(
            azure.delete(ResourceKind::VpnGateway, "vpn-gw").await.unwrap(),
            DeleteStatus::NotFound
        );
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(PIP_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .await
            .get(ResourceKind::PublicIp, "pip-1")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
