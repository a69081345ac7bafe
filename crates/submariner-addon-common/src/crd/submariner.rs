//! Submariner operator resources as seen from the addon

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the Submariner CR created by the addon
pub const SUBMARINER_CR_NAME: &str = "submariner";

/// Connection status reported for an established cable
pub const CONNECTION_CONNECTED: &str = "connected";

/// Submariner CR spec, the subset the addon renders
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "submariner.io",
    version = "v1alpha1",
    kind = "Submariner",
    namespaced,
    status = "SubmarinerStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SubmarinerSpec {
    /// Broker type
    #[serde(default)]
    pub broker: String,
    /// Broker API server host:port
    #[serde(default)]
    pub broker_k8s_api_server: String,
    /// Broker service-account token
    #[serde(default)]
    pub broker_k8s_api_server_token: String,
    /// Broker CA bundle
    #[serde(default, rename = "brokerK8sCA")]
    pub broker_k8s_ca: String,
    /// Broker namespace
    #[serde(default)]
    pub broker_k8s_remote_namespace: String,
    /// Cable driver
    #[serde(default)]
    pub cable_driver: String,
    /// IPsec debug
    #[serde(default, rename = "ceIPSecDebug")]
    pub ce_ipsec_debug: bool,
    /// IKE port
    #[serde(default, rename = "ceIPSecIKEPort")]
    pub ce_ipsec_ike_port: u16,
    /// NAT-T port
    #[serde(default, rename = "ceIPSecNATTPort")]
    pub ce_ipsec_natt_port: u16,
    /// IPsec pre-shared key
    #[serde(default, rename = "ceIPSecPSK")]
    pub ce_ipsec_psk: String,
    /// Local cluster id
    #[serde(default, rename = "clusterID")]
    pub cluster_id: String,
    /// Debug logging
    #[serde(default)]
    pub debug: bool,
    /// Globalnet CIDR
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "globalCIDR")]
    pub global_cidr: Option<String>,
    /// Component image overrides
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub image_overrides: BTreeMap<String, String>,
    /// Gateway exposed through a LoadBalancer
    #[serde(default)]
    pub load_balancer_enabled: bool,
    /// NAT traversal
    #[serde(default)]
    pub nat_enabled: bool,
    /// Namespace of the Submariner components
    #[serde(default)]
    pub namespace: String,
    /// Lighthouse service discovery
    #[serde(default)]
    pub service_discovery_enabled: bool,
    /// Air-gapped install
    #[serde(default)]
    pub air_gapped_deployment: bool,
}

/// Submariner CR status, the subset the spoke reads
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmarinerStatus {
    /// Gateway statuses
    #[serde(default)]
    pub gateways: Vec<GatewayStatus>,
    /// Network plugin detected by the operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_plugin: Option<String>,
}

/// One gateway's view of its cables
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    /// active or passive
    #[serde(default)]
    pub ha_status: String,
    /// Endpoint of this gateway
    #[serde(default)]
    pub local_endpoint: EndpointSpec,
    /// Connections to remote clusters
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// Gateway-level status failure
    #[serde(default)]
    pub status_failure: String,
}

impl GatewayStatus {
    /// True for the active gateway of a HA pair
    pub fn is_active(&self) -> bool {
        self.ha_status == "active"
    }
}

/// A cable to a remote cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// connecting, connected or error
    #[serde(default)]
    pub status: String,
    /// Details
    #[serde(default)]
    pub status_message: String,
    /// Remote endpoint
    #[serde(default)]
    pub endpoint: EndpointSpec,
}

/// Identity of a gateway endpoint
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSpec {
    /// Cluster id
    #[serde(default, rename = "cluster_id")]
    pub cluster_id: String,
    /// Gateway host name
    #[serde(default)]
    pub hostname: String,
}

/// RouteAgent spec, empty from the addon's point of view
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "submariner.io",
    version = "v1alpha1",
    kind = "RouteAgent",
    namespaced,
    status = "RouteAgentStatus"
)]
pub struct RouteAgentSpec {}

/// RouteAgent status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteAgentStatus {
    /// Health of the paths to remote endpoints
    #[serde(default)]
    pub remote_endpoints: Vec<RemoteEndpoint>,
}

/// Route agent's view of a remote endpoint
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEndpoint {
    /// connected, connecting, error or none
    #[serde(default)]
    pub status: String,
    /// Details
    #[serde(default)]
    pub status_message: String,
    /// Remote endpoint identity
    #[serde(default)]
    pub spec: EndpointSpec,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_uses_operator_field_names() {
        let spec = SubmarinerSpec {
            ce_ipsec_psk: "secret".to_string(),
            cluster_id: "cluster1".to_string(),
            broker_k8s_ca: "ca".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["ceIPSecPSK"], "secret");
        assert_eq!(json["clusterID"], "cluster1");
        assert_eq!(json["brokerK8sCA"], "ca");
        assert!(json.get("imageOverrides").is_none());
    }

    #[test]
    fn gateway_status_parses_connections() {
        let status: SubmarinerStatus = serde_json::from_value(serde_json::json!({
            "gateways": [{
                "haStatus": "active",
                "localEndpoint": {"cluster_id": "c1", "hostname": "gw1"},
                "connections": [{
                    "status": "connected",
                    "endpoint": {"cluster_id": "c2", "hostname": "gw2"}
                }]
            }]
        }))
        .unwrap();
        let gateway = &status.gateways[0];
        assert!(gateway.is_active());
        assert_eq!(gateway.connections[0].status, CONNECTION_CONNECTED);
        assert_eq!(gateway.connections[0].endpoint.cluster_id, "c2");
    }
}
