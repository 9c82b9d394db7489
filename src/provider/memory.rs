//! In-memory simulated control plane.
//!
//! Used by `--simulate` runs and by tests. Behaves like an eventually
//! consistent API: writes can stay in progress for a number of polls, ids
//! are ARM-shaped, public IPs get addresses, and failures can be scripted
//! per resource name.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ProviderError;
use crate::graph::{Properties, ProviderHandle, ResourceKind};
use crate::planner::WRITE_ONLY_KEYS;

use super::arm_id;
use super::traits::{
    DeleteStatus, LiveResource, Provider, ProviderResult, ProvisionStatus, ProvisioningState,
    ResourceRequest,
};

/// Simulated provider.
#[derive(Debug)]
pub struct SimulatedProvider {
    subscription_id: String,
    resource_group: String,
    accepted_polls: u32,
    inner: Mutex<SimState>,
}

#[derive(Debug, Default)]
struct SimState {
    resources: HashMap<(ResourceKind, String), SimResource>,
    scripted: HashMap<String, VecDeque<ProviderError>>,
    failing_provisioning: HashMap<String, String>,
    create_calls: HashMap<String, u32>,
    get_calls: u32,
    delete_calls: u32,
    next_ip: u32,
}

#[derive(Debug, Clone)]
struct SimResource {
    handle: ProviderHandle,
    properties: Properties,
    pending_polls: u32,
    failure: Option<String>,
}

impl SimulatedProvider {
    /// Creates a simulated provider for a resource group.
    #[must_use]
    pub fn new(subscription_id: impl Into<String>, resource_group: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            accepted_polls: 0,
            inner: Mutex::new(SimState::default()),
        }
    }

    /// Makes every write report `Accepted` and stay in progress for `polls` reads.
    #[must_use]
    pub const fn with_accepted_polls(mut self, polls: u32) -> Self {
        self.accepted_polls = polls;
        self
    }

    /// Queues an error returned by the next write (create or delete) on `name`.
    pub async fn fail_next(&self, name: &str, error: ProviderError) {
        let mut state = self.inner.lock().await;
        state
            .scripted
            .entry(name.to_string())
            .or_default()
            .push_back(error);
    }

    /// Makes `name` end in the `Failed` provisioning state after its next write.
    pub async fn fail_provisioning(&self, name: &str, message: &str) {
        let mut state = self.inner.lock().await;
        state
            .failing_provisioning
            .insert(name.to_string(), message.to_string());
    }

    /// Overwrites a live property, as if changed outside the orchestrator.
    pub async fn drift(&self, kind: ResourceKind, name: &str, key: &str, value: Value) {
        let mut state = self.inner.lock().await;
        if let Some(resource) = state.resources.get_mut(&(kind, name.to_string())) {
            resource.properties.insert(key.to_string(), value);
        }
    }

    /// Returns true if a resource exists.
    pub async fn contains(&self, kind: ResourceKind, name: &str) -> bool {
        self.inner
            .lock()
            .await
            .resources
            .contains_key(&(kind, name.to_string()))
    }

    /// Returns the number of stored resources.
    pub async fn resource_count(&self) -> usize {
        self.inner.lock().await.resources.len()
    }

    /// Returns the number of create-or-update calls made for `name`.
    pub async fn create_calls(&self, name: &str) -> u32 {
        self.inner
            .lock()
            .await
            .create_calls
            .get(name)
            .copied()
            .unwrap_or_default()
    }

    /// Returns the total number of create-or-update calls.
    pub async fn total_create_calls(&self) -> u32 {
        self.inner.lock().await.create_calls.values().sum()
    }

    /// Returns the total number of get calls.
    pub async fn get_calls(&self) -> u32 {
        self.inner.lock().await.get_calls
    }

    /// Returns the total number of delete calls.
    pub async fn delete_calls(&self) -> u32 {
        self.inner.lock().await.delete_calls
    }

    fn attributes(
        state: &mut SimState,
        request: &ResourceRequest,
        previous: Option<&SimResource>,
    ) -> Properties {
        let mut attributes = Properties::new();
        let props = &request.properties;

        match request.kind {
            ResourceKind::PublicIp => {
                let address = previous
                    .and_then(|p| p.handle.attribute_str("ip_address"))
                    .map_or_else(
                        || {
                            state.next_ip += 1;
                            format!("20.62.{}.{}", state.next_ip / 250, state.next_ip % 250 + 4)
                        },
                        String::from,
                    );
                attributes.insert(String::from("ip_address"), Value::String(address));
            }
            ResourceKind::GatewayIpConfig => {
                let short_name = request
                    .name
                    .split_once('/')
                    .map_or(request.name.as_str(), |(_, n)| n);
                attributes.insert(String::from("name"), Value::String(short_name.to_string()));
                for key in ["public_ip_address_id", "subnet_id", "private_ip_address_allocation"] {
                    if let Some(value) = props.get(key) {
                        attributes.insert(key.to_string(), value.clone());
                    }
                }
            }
            ResourceKind::VpnGateway => {
                if props.get("enable_bgp") == Some(&Value::Bool(true)) {
                    attributes.insert(
                        String::from("bgp_peering_address"),
                        Value::String(String::from("10.0.255.30")),
                    );
                }
            }
            ResourceKind::Nsg | ResourceKind::LocalNetworkGateway | ResourceKind::VpnConnection => {
            }
        }

        attributes
    }

    fn check_references(state: &SimState, request: &ResourceRequest) -> ProviderResult<()> {
        let mut ids: Vec<&str> = request
            .properties
            .iter()
            .filter(|(key, _)| key.ends_with("_id") && key.as_str() != "subnet_id")
            .filter_map(|(_, value)| value.as_str())
            .collect();

        if let Some(Value::Array(entries)) = request.properties.get("ip_configurations") {
            ids.extend(entries.iter().filter_map(|e| e.get("id").and_then(Value::as_str)));
        }

        for id in ids {
            let exists = state.resources.values().any(|r| r.handle.id == id);
            if !exists {
                return Err(ProviderError::InvalidProperty {
                    message: format!("{} references missing resource {id}", request.name),
                });
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Provider for SimulatedProvider {
    async fn create_or_update(&self, request: &ResourceRequest) -> ProviderResult<ProvisionStatus> {
        let mut state = self.inner.lock().await;
        *state.create_calls.entry(request.name.clone()).or_default() += 1;

        if let Some(error) = state
            .scripted
            .get_mut(&request.name)
            .and_then(VecDeque::pop_front)
        {
            debug!("Simulated failure for {}: {}", request.name, error);
            return Err(error);
        }

        Self::check_references(&state, request)?;

        let key = (request.kind, request.name.clone());
        let previous = state.resources.get(&key).cloned();
        let attributes = Self::attributes(&mut state, request, previous.as_ref());
        let handle = ProviderHandle {
            id: arm_id(&self.subscription_id, &self.resource_group, request.kind, &request.name),
            attributes,
        };

        let properties: Properties = request
            .properties
            .iter()
            .filter(|(k, _)| !WRITE_ONLY_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let failure = state.failing_provisioning.remove(&request.name);
        let resource = SimResource {
            handle: handle.clone(),
            properties,
            pending_polls: self.accepted_polls,
            failure: failure.clone(),
        };
        state.resources.insert(key, resource);

        debug!("Simulated write of {} {}", request.kind, request.name);
        if self.accepted_polls == 0 && failure.is_none() {
            Ok(ProvisionStatus::Succeeded(handle))
        } else {
            Ok(ProvisionStatus::Accepted)
        }
    }

    async fn get(&self, kind: ResourceKind, name: &str) -> ProviderResult<Option<LiveResource>> {
        let mut state = self.inner.lock().await;
        state.get_calls += 1;

        let Some(resource) = state.resources.get_mut(&(kind, name.to_string())) else {
            return Ok(None);
        };

        let provisioning_state = if resource.pending_polls > 0 {
            resource.pending_polls -= 1;
            ProvisioningState::InProgress
        } else if resource.failure.is_some() {
            ProvisioningState::Failed
        } else {
            ProvisioningState::Succeeded
        };

        Ok(Some(LiveResource {
            name: name.to_string(),
            handle: resource.handle.clone(),
            properties: resource.properties.clone(),
            provisioning_state,
        }))
    }

    async fn delete(&self, kind: ResourceKind, name: &str) -> ProviderResult<DeleteStatus> {
        let mut state = self.inner.lock().await;
        state.delete_calls += 1;

        if let Some(error) = state.scripted.get_mut(name).and_then(VecDeque::pop_front) {
            return Err(error);
        }

        match state.resources.remove(&(kind, name.to_string())) {
            Some(_) => {
                debug!("Simulated delete of {} {}", kind, name);
                Ok(DeleteStatus::Deleted)
            }
            None => Ok(DeleteStatus::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(kind: ResourceKind, name: &str, properties: Properties) -> ResourceRequest {
        ResourceRequest {
            kind,
            name: name.to_string(),
            properties,
        }
    }

    #[tokio::test]
    async fn test_public_ip_gets_address_and_id() {
        let provider = SimulatedProvider::new("sub", "rg");
        let status = provider
            .create_or_update(&request(ResourceKind::PublicIp, "pip-1", Properties::new()))
            .await
            .unwrap();

        let ProvisionStatus::Succeeded(handle) = status else {
            panic!("expected immediate success");
        };
        assert!(handle.id.ends_with("/publicIPAddresses/pip-1"));
        assert!(handle.attribute_str("ip_address").is_some());
        assert_eq!(provider.create_calls("pip-1").await, 1);
    }

    #[tokio::test]
    async fn test_accepted_then_succeeded() {
        let provider = SimulatedProvider::new("sub", "rg").with_accepted_polls(2);
        let status = provider
            .create_or_update(&request(ResourceKind::Nsg, "nsg", Properties::new()))
            .await
            .unwrap();
        assert_eq!(status, ProvisionStatus::Accepted);

        let states: Vec<ProvisioningState> = [
            provider.get(ResourceKind::Nsg, "nsg").await.unwrap(),
            provider.get(ResourceKind::Nsg, "nsg").await.unwrap(),
            provider.get(ResourceKind::Nsg, "nsg").await.unwrap(),
        ]
        .into_iter()
        .flatten()
        .map(|r| r.provisioning_state)
        .collect();

        assert_eq!(
            states,
            vec![
                ProvisioningState::InProgress,
                ProvisioningState::InProgress,
                ProvisioningState::Succeeded
            ]
        );
    }

    #[tokio::test]
    async fn test_scripted_failure_then_success() {
        let provider = SimulatedProvider::new("sub", "rg");
        provider
            .fail_next("lng", ProviderError::RateLimited { retry_after_secs: 1 })
            .await;

        let req = request(ResourceKind::LocalNetworkGateway, "lng", Properties::new());
        assert!(provider.create_or_update(&req).await.is_err());
        assert!(provider.create_or_update(&req).await.is_ok());
        assert_eq!(provider.create_calls("lng").await, 2);
    }

    #[tokio::test]
    async fn test_missing_reference_rejected() {
        let provider = SimulatedProvider::new("sub", "rg");
        let props = Properties::from([(
            String::from("local_network_gateway_id"),
            json!("/subscriptions/sub/missing"),
        )]);
        let err = provider
            .create_or_update(&request(ResourceKind::VpnConnection, "conn", props))
            .await
            .unwrap_err();
        assert_eq!(err.kind_name(), "invalid_property");
    }

    #[tokio::test]
    async fn test_shared_key_not_returned() {
        let provider = SimulatedProvider::new("sub", "rg");
        let props = Properties::from([(String::from("shared_key"), json!("secret"))]);
        provider
            .create_or_update(&request(ResourceKind::VpnConnection, "conn", props))
            .await
            .unwrap();

        let live = provider
            .get(ResourceKind::VpnConnection, "conn")
            .await
            .unwrap()
            .unwrap();
        assert!(!live.properties.contains_key("shared_key"));
    }

    #[tokio::test]
    async fn test_delete() {
        let provider = SimulatedProvider::new("sub", "rg");
        provider
            .create_or_update(&request(ResourceKind::Nsg, "nsg", Properties::new()))
            .await
            .unwrap();

        assert_eq!(
            provider.delete(ResourceKind::Nsg, "nsg").await.unwrap(),
            DeleteStatus::Deleted
        );
        assert_eq!(
            provider.delete(ResourceKind::Nsg, "nsg").await.unwrap(),
            DeleteStatus::NotFound
        );
        assert!(!provider.contains(ResourceKind::Nsg, "nsg").await);
    }
}
