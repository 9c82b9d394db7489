//! Mapping between declared properties and ARM resource documents.

use serde_json::{json, Map, Value};

use crate::graph::{Properties, ProviderHandle, ResourceKind};

use super::traits::ProvisioningState;

// Azure requires lifetimes alongside a custom IPsec policy; these are its defaults.
const SA_LIFETIME_SECONDS: u64 = 27_000;
const SA_DATA_SIZE_KILOBYTES: u64 = 102_400_000;

fn str_prop<'a>(properties: &'a Properties, key: &str) -> Option<&'a str> {
    properties.get(key).and_then(Value::as_str)
}

fn id_ref(properties: &Properties, key: &str) -> Option<Value> {
    str_prop(properties, key).map(|id| json!({ "id": id }))
}

/// Builds the PUT body for a resource.
#[must_use]
pub fn to_body(kind: ResourceKind, properties: &Properties) -> Value {
    let mut body = Map::new();
    for key in ["location", "tags"] {
        if let Some(value) = properties.get(key) {
            body.insert(key.to_string(), value.clone());
        }
    }

    let mut inner = Map::new();
    match kind {
        ResourceKind::PublicIp => {
            if let Some(sku) = properties.get("sku") {
                body.insert(String::from("sku"), json!({ "name": sku }));
            }
            if let Some(Value::Array(zones)) = properties.get("zones")
                && !zones.is_empty()
            {
                body.insert(String::from("zones"), Value::Array(zones.clone()));
            }
            if let Some(method) = properties.get("allocation_method") {
                inner.insert(String::from("publicIPAllocationMethod"), method.clone());
            }
        }
        ResourceKind::Nsg | ResourceKind::GatewayIpConfig => {}
        ResourceKind::VpnGateway => gateway_body(properties, &mut inner),
        ResourceKind::LocalNetworkGateway => {
            if let Some(address) = properties.get("gateway_address") {
                inner.insert(String::from("gatewayIpAddress"), address.clone());
            }
            if let Some(prefixes) = properties.get("address_space") {
                inner.insert(
                    String::from("localNetworkAddressSpace"),
                    json!({ "addressPrefixes": prefixes }),
                );
            }
        }
        ResourceKind::VpnConnection => connection_body(properties, &mut inner),
    }

    body.insert(String::from("properties"), Value::Object(inner));
    Value::Object(body)
}

// No NSG link is sent; the gateway's NSG reference only orders the graph.
fn gateway_body(properties: &Properties, inner: &mut Map<String, Value>) {
    for (key, arm_key) in [
        ("gateway_type", "gatewayType"),
        ("vpn_type", "vpnType"),
        ("active_active", "activeActive"),
        ("enable_bgp", "enableBgp"),
    ] {
        if let Some(value) = properties.get(key) {
            inner.insert(arm_key.to_string(), value.clone());
        }
    }

    if let Some(sku) = properties.get("sku") {
        inner.insert(String::from("sku"), json!({ "name": sku, "tier": sku }));
    }

    if let Some(asn) = properties.get("bgp_asn") {
        inner.insert(String::from("bgpSettings"), json!({ "asn": asn }));
    }

    if let Some(Value::Array(entries)) = properties.get("ip_configurations") {
        let configs: Vec<Value> = entries
            .iter()
            .map(|entry| {
                let mut config = Map::new();
                if let Some(allocation) = entry.get("private_ip_address_allocation") {
                    config.insert(String::from("privateIPAllocationMethod"), allocation.clone());
                }
                if let Some(subnet) = entry.get("subnet_id").and_then(Value::as_str)
                    && !subnet.is_empty()
                {
                    config.insert(String::from("subnet"), json!({ "id": subnet }));
                }
                if let Some(pip) = entry.get("public_ip_address_id") {
                    config.insert(String::from("publicIPAddress"), json!({ "id": pip }));
                }
                json!({
                    "name": entry.get("name").cloned().unwrap_or(Value::Null),
                    "properties": config,
                })
            })
            .collect();
        inner.insert(String::from("ipConfigurations"), Value::Array(configs));
    }
}

fn connection_body(properties: &Properties, inner: &mut Map<String, Value>) {
    for (key, arm_key) in [
        ("connection_type", "connectionType"),
        ("connection_protocol", "connectionProtocol"),
        ("shared_key", "sharedKey"),
    ] {
        if let Some(value) = properties.get(key) {
            inner.insert(arm_key.to_string(), value.clone());
        }
    }

    if let Some(gateway) = id_ref(properties, "virtual_network_gateway_id") {
        inner.insert(String::from("virtualNetworkGateway1"), gateway);
    }
    if let Some(lng) = id_ref(properties, "local_network_gateway_id") {
        inner.insert(String::from("localNetworkGateway2"), lng);
    }

    if let Some(policy) = properties.get("ipsec_policy") {
        let field = |name: &str| policy.get(name).cloned().unwrap_or(Value::Null);
        inner.insert(
            String::from("ipsecPolicies"),
            json!([{
                "dhGroup": field("dh_group"),
                "ikeEncryption": field("ike_encryption"),
                "ikeIntegrity": field("ike_integrity"),
                "ipsecEncryption": field("ipsec_encryption"),
                "ipsecIntegrity": field("ipsec_integrity"),
                "pfsGroup": field("pfs_group"),
                "saLifeTimeSeconds": SA_LIFETIME_SECONDS,
                "saDataSizeKilobytes": SA_DATA_SIZE_KILOBYTES,
            }]),
        );
    }
}

/// Reads the provisioning state of an ARM document.
#[must_use]
pub fn provisioning_state(document: &Value) -> ProvisioningState {
    document
        .pointer("/properties/provisioningState")
        .and_then(Value::as_str)
        .map_or(ProvisioningState::InProgress, ProvisioningState::from_arm)
}

/// Converts an ARM document into declared-shape properties and a handle.
#[must_use]
pub fn from_document(kind: ResourceKind, document: &Value) -> (ProviderHandle, Properties) {
    let id = document.get("id").and_then(Value::as_str).unwrap_or_default();
    let mut handle = ProviderHandle::new(id);
    let mut properties = Properties::new();

    for key in ["location", "tags"] {
        if let Some(value) = document.get(key) {
            properties.insert(key.to_string(), value.clone());
        }
    }

    let get = |pointer: &str| document.pointer(pointer).cloned();
    let mut copy = |key: &str, pointer: &str| {
        if let Some(value) = get(pointer) {
            properties.insert(key.to_string(), value);
        }
    };

    match kind {
        ResourceKind::PublicIp => {
            copy("sku", "/sku/name");
            copy("allocation_method", "/properties/publicIPAllocationMethod");
            copy("zones", "/zones");
            if let Some(address) = get("/properties/ipAddress") {
                handle.attributes.insert(String::from("ip_address"), address);
            }
        }
        ResourceKind::Nsg | ResourceKind::GatewayIpConfig => {}
        ResourceKind::VpnGateway => {
            copy("gateway_type", "/properties/gatewayType");
            copy("vpn_type", "/properties/vpnType");
            copy("sku", "/properties/sku/name");
            copy("active_active", "/properties/activeActive");
            copy("enable_bgp", "/properties/enableBgp");
            if get("/properties/enableBgp") == Some(Value::Bool(true)) {
                copy("bgp_asn", "/properties/bgpSettings/asn");
                if let Some(address) = get("/properties/bgpSettings/bgpPeeringAddress") {
                    handle
                        .attributes
                        .insert(String::from("bgp_peering_address"), address);
                }
            }
            if let Some(Value::Array(entries)) = get("/properties/ipConfigurations") {
                let bound: Vec<Value> = entries
                    .iter()
                    .filter_map(|entry| entry.get("name").and_then(Value::as_str))
                    .filter_map(|name| ip_configuration(document, name))
                    .map(|(config, _)| config.to_entry())
                    .collect();
                properties.insert(String::from("ip_configurations"), Value::Array(bound));
            }
        }
        ResourceKind::LocalNetworkGateway => {
            copy("gateway_address", "/properties/gatewayIpAddress");
            copy(
                "address_space",
                "/properties/localNetworkAddressSpace/addressPrefixes",
            );
        }
        ResourceKind::VpnConnection => {
            copy("connection_type", "/properties/connectionType");
            copy("connection_protocol", "/properties/connectionProtocol");
            copy("virtual_network_gateway_id", "/properties/virtualNetworkGateway1/id");
            copy("local_network_gateway_id", "/properties/localNetworkGateway2/id");
            if let Some(policy) = get("/properties/ipsecPolicies/0") {
                let field = |name: &str| policy.get(name).cloned().unwrap_or(Value::Null);
                properties.insert(
                    String::from("ipsec_policy"),
                    json!({
                        "dh_group": field("dhGroup"),
                        "ike_encryption": field("ikeEncryption"),
                        "ike_integrity": field("ikeIntegrity"),
                        "ipsec_encryption": field("ipsecEncryption"),
                        "ipsec_integrity": field("ipsecIntegrity"),
                        "pfs_group": field("pfsGroup"),
                    }),
                );
            }
        }
    }

    (handle, properties)
}

/// Extracts one IP configuration from a gateway document.
///
/// The configuration inherits the gateway's location and tags.
#[must_use]
pub fn ip_configuration(gateway: &Value, name: &str) -> Option<(ProviderHandle, Properties)> {
    let entry = gateway
        .pointer("/properties/ipConfigurations")
        .and_then(Value::as_array)?
        .iter()
        .find(|c| c.get("name").and_then(Value::as_str) == Some(name))?;

    let id = entry.get("id").and_then(Value::as_str).unwrap_or_default();
    let mut properties = Properties::new();
    for key in ["location", "tags"] {
        if let Some(value) = gateway.get(key) {
            properties.insert(key.to_string(), value.clone());
        }
    }

    let allocation = entry.pointer("/properties/privateIPAllocationMethod").cloned();
    let subnet = entry
        .pointer("/properties/subnet/id")
        .cloned()
        .unwrap_or_else(|| Value::String(String::new()));
    let public_ip = entry.pointer("/properties/publicIPAddress/id").cloned();

    if let Some(allocation) = &allocation {
        properties.insert(String::from("private_ip_address_allocation"), allocation.clone());
    }
    properties.insert(String::from("subnet_id"), subnet.clone());
    if let Some(public_ip) = &public_ip {
        properties.insert(String::from("public_ip_address_id"), public_ip.clone());
    }

    let mut handle = ProviderHandle::new(id).with_attribute("name", name);
    handle.attributes.insert(String::from("subnet_id"), subnet);
    if let Some(allocation) = allocation {
        handle
            .attributes
            .insert(String::from("private_ip_address_allocation"), allocation);
    }
    if let Some(public_ip) = public_ip {
        handle
            .attributes
            .insert(String::from("public_ip_address_id"), public_ip);
    }

    Some((handle, properties))
}

/// Reads the `error.code` and `error.message` of an ARM error body.
#[must_use]
pub fn error_details(body: &str) -> (String, String) {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let code = parsed
        .pointer("/error/code")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let message = parsed
        .pointer("/error/message")
        .and_then(Value::as_str)
        .map_or_else(|| body.to_string(), String::from);
    (code, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(value: Value) -> Properties {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_public_ip_round_trip_shape() {
        let declared = props(json!({
            "location": "East US",
            "tags": {"environment": "test"},
            "sku": "Standard",
            "allocation_method": "Static",
            "zones": []
        }));

        let body = to_body(ResourceKind::PublicIp, &declared);
        assert_eq!(body["sku"]["name"], "Standard");
        assert!(body.get("zones").is_none());
        assert_eq!(body["properties"]["publicIPAllocationMethod"], "Static");

        let document = json!({
            "id": "/pip",
            "location": "eastus",
            "tags": {"environment": "test"},
            "sku": {"name": "Standard"},
            "properties": {"publicIPAllocationMethod": "Static", "ipAddress": "20.1.2.3"}
        });
        let (handle, live) = from_document(ResourceKind::PublicIp, &document);
        assert_eq!(handle.attribute_str("ip_address"), Some("20.1.2.3"));
        assert_eq!(live["allocation_method"], "Static");
    }

    #[test]
    fn test_gateway_body() {
        let declared = props(json!({
            "gateway_type": "Vpn",
            "vpn_type": "RouteBased",
            "sku": "VpnGw1",
            "active_active": false,
            "enable_bgp": true,
            "bgp_asn": 65001,
            "ip_configurations": [{
                "id": "/gw/ipConfigurations/cfg1",
                "name": "cfg1",
                "private_ip_address_allocation": "Dynamic",
                "subnet_id": "/subnets/GatewaySubnet",
                "public_ip_address_id": "/pip"
            }]
        }));

        let body = to_body(ResourceKind::VpnGateway, &declared);
        assert_eq!(body["properties"]["bgpSettings"]["asn"], 65001);
        assert_eq!(body["properties"]["sku"]["tier"], "VpnGw1");
        let config = &body["properties"]["ipConfigurations"][0];
        assert_eq!(config["name"], "cfg1");
        assert_eq!(config["properties"]["publicIPAddress"]["id"], "/pip");
        assert_eq!(config["properties"]["subnet"]["id"], "/subnets/GatewaySubnet");
    }

    #[test]
    fn test_gateway_reads_back_bound_ip_configurations() {
        let document = json!({
            "id": "/gw",
            "location": "eastus",
            "properties": {
                "enableBgp": false,
                "ipConfigurations": [{
                    "id": "/gw/ipConfigurations/cfg1",
                    "name": "cfg1",
                    "properties": {
                        "privateIPAllocationMethod": "Static",
                        "privateIPAddress": "10.0.255.4",
                        "subnet": {"id": "/subnets/OtherSubnet"},
                        "publicIPAddress": {"id": "/pip"}
                    }
                }]
            }
        });

        let (_, live) = from_document(ResourceKind::VpnGateway, &document);
        let (config, _) = ip_configuration(&document, "cfg1").unwrap();
        assert_eq!(live["ip_configurations"], json!([config.to_entry()]));
        assert_eq!(
            live["ip_configurations"][0],
            json!({
                "id": "/gw/ipConfigurations/cfg1",
                "name": "cfg1",
                "private_ip_address_allocation": "Static",
                "subnet_id": "/subnets/OtherSubnet",
                "public_ip_address_id": "/pip"
            })
        );
    }

    #[test]
    fn test_gateway_body_has_no_nsg_link() {
        let declared = props(json!({"gateway_type": "Vpn", "network_security_group_id": "/nsg"}));
        let body = to_body(ResourceKind::VpnGateway, &declared);
        assert_eq!(body["properties"], json!({"gatewayType": "Vpn"}));
    }

    #[test]
    fn test_connection_policy_mapping() {
        let declared = props(json!({
            "connection_type": "IPsec",
            "shared_key": "k",
            "virtual_network_gateway_id": "/gw",
            "local_network_gateway_id": "/lng",
            "ipsec_policy": {
                "dh_group": "DHGroup14", "ike_encryption": "AES256", "ike_integrity": "SHA256",
                "ipsec_encryption": "AES256", "ipsec_integrity": "SHA256", "pfs_group": "PFS14"
            }
        }));

        let body = to_body(ResourceKind::VpnConnection, &declared);
        assert_eq!(body["properties"]["localNetworkGateway2"]["id"], "/lng");
        assert_eq!(body["properties"]["ipsecPolicies"][0]["pfsGroup"], "PFS14");

        let (_, live) = from_document(ResourceKind::VpnConnection, &body);
        assert_eq!(live["ipsec_policy"], declared["ipsec_policy"]);
        assert_eq!(live["virtual_network_gateway_id"], "/gw");
        assert_eq!(live["local_network_gateway_id"], "/lng");
        assert!(!live.contains_key("shared_key"));
    }

    #[test]
    fn test_ip_configuration_lookup() {
        let gateway = json!({
            "location": "eastus",
            "properties": {"ipConfigurations": [{
                "id": "/gw/ipConfigurations/cfg1",
                "name": "cfg1",
                "properties": {
                    "privateIPAllocationMethod": "Dynamic",
                    "publicIPAddress": {"id": "/pip"}
                }
            }]}
        });

        let (handle, properties) = ip_configuration(&gateway, "cfg1").unwrap();
        assert_eq!(handle.attribute_str("public_ip_address_id"), Some("/pip"));
        assert_eq!(properties["subnet_id"], "");
        assert!(ip_configuration(&gateway, "cfg2").is_none());
    }

    #[test]
    fn test_error_details() {
        let (code, message) =
            error_details(r#"{"error":{"code":"QuotaExceeded","message":"too many"}}"#);
        assert_eq!(code, "QuotaExceeded");
        assert_eq!(message, "too many");

        let (code, message) = error_details("plain");
        assert!(code.is_empty());
        assert_eq!(message, "plain");
    }
}
