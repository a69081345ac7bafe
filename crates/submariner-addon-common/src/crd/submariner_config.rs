//! SubmarinerConfig: per-cluster Submariner deployment settings on the hub

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, LocalSecretReference};

/// The only SubmarinerConfig name the addon honours
pub const SUBMARINER_CONFIG_NAME: &str = "submariner";

/// Condition: cloud firewall and gateway instances are ready
pub const CONDITION_ENV_PREPARED: &str = "SubmarinerClusterEnvironmentPrepared";
/// Reason: cloud preparation succeeded
pub const REASON_ENV_PREPARED: &str = "SubmarinerClusterEnvironmentPrepared";
/// Reason: cloud preparation failed
pub const REASON_ENV_PREPARATION_FAILED: &str = "SubmarinerClusterEnvironmentPreparationFailed";

/// Condition: gateway nodes carry the gateway label
pub const CONDITION_GATEWAY_NODES_LABELED: &str = "SubmarinerGatewayNodesLabeled";
/// Reason: gateway label applied
pub const REASON_GATEWAY_NODES_LABELED: &str = "SubmarinerGatewayNodesLabeled";
/// Reason: labelling failed
pub const REASON_GATEWAY_NODES_LABELING_FAILED: &str = "SubmarinerGatewayNodesLabelingFailed";
/// Reason: gateways are dedicated cloud instances
pub const REASON_MANAGED_CLUSTER_ON_CLOUD: &str = "ManagedClusterOnCloud";

/// Condition: the config has been rendered into ManifestWorks
pub const CONDITION_CONFIG_APPLIED: &str = "SubmarinerConfigApplied";
/// Reason: ManifestWorks are up to date
pub const REASON_CONFIG_APPLIED: &str = "SubmarinerConfigApplied";
/// Reason: rendering or applying ManifestWorks failed
pub const REASON_CONFIG_APPLY_FAILED: &str = "SubmarinerConfigApplyFailed";

/// Finalizer guarding cloud cleanup
pub const CONFIG_FINALIZER: &str = "submarineraddon.open-cluster-management.io/config-cleanup";

/// Specification for a SubmarinerConfig
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "submarineraddon.open-cluster-management.io",
    version = "v1alpha1",
    kind = "SubmarinerConfig",
    namespaced,
    status = "SubmarinerConfigStatus",
    shortname = "subconfig",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SubmarinerConfigSpec {
    /// Secret holding the cloud provider credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_secret: Option<LocalSecretReference>,

    /// Operator subscription overrides
    #[serde(default)]
    pub subscription_config: SubscriptionConfig,

    /// Image overrides for Submariner components
    #[serde(default)]
    pub image_pull_specs: SubmarinerImagePullSpecs,

    /// Cable driver (libreswan, wireguard, vxlan)
    #[serde(default = "default_cable_driver")]
    pub cable_driver: String,

    /// IKE port for IPsec
    #[serde(default = "default_ike_port", rename = "IPSecIKEPort")]
    pub ipsec_ike_port: u16,

    /// NAT-T port for IPsec
    #[serde(default = "default_natt_port", rename = "IPSecNATTPort")]
    pub ipsec_natt_port: u16,

    /// Port used for NAT discovery between gateways
    #[serde(default = "default_natt_discovery_port", rename = "NATTDiscoveryPort")]
    pub natt_discovery_port: u16,

    /// Whether gateways negotiate NAT traversal
    #[serde(default = "default_true", rename = "NATTEnable")]
    pub natt_enable: bool,

    /// Globalnet CIDR for overlapping cluster networks
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "globalCIDR")]
    pub global_cidr: Option<String>,

    /// Expose gateways through a LoadBalancer service
    #[serde(default)]
    pub load_balancer_enable: bool,

    /// Skip components that need internet access
    #[serde(default)]
    pub air_gapped_deployment: bool,

    /// Enable debug logging in Submariner components
    #[serde(default)]
    pub debug: bool,

    /// Dedicated gateway instance settings
    #[serde(default)]
    pub gateway_config: GatewayConfig,
}

impl Default for SubmarinerConfigSpec {
    fn default() -> Self {
        Self {
            credentials_secret: None,
            subscription_config: SubscriptionConfig::default(),
            image_pull_specs: SubmarinerImagePullSpecs::default(),
            cable_driver: default_cable_driver(),
            ipsec_ike_port: default_ike_port(),
            ipsec_natt_port: default_natt_port(),
            natt_discovery_port: default_natt_discovery_port(),
            natt_enable: true,
            global_cidr: None,
            load_balancer_enable: false,
            air_gapped_deployment: false,
            debug: false,
            gateway_config: GatewayConfig::default(),
        }
    }
}

/// OLM subscription overrides
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionConfig {
    /// Catalog source name
    #[serde(default = "default_source")]
    pub source: String,
    /// Namespace of the catalog source
    #[serde(default = "default_source_namespace")]
    pub source_namespace: String,
    /// Subscription channel
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Pin a specific CSV
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_csv: Option<String>,
    /// Automatic or Manual
    #[serde(default = "default_install_plan_approval")]
    pub install_plan_approval: String,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            source_namespace: default_source_namespace(),
            channel: default_channel(),
            starting_csv: None,
            install_plan_approval: default_install_plan_approval(),
        }
    }
}

/// Image overrides for Submariner components
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmarinerImagePullSpecs {
    /// submariner-gateway image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submariner_image_pull_spec: Option<String>,
    /// lighthouse-agent image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lighthouse_agent_image_pull_spec: Option<String>,
    /// lighthouse-coredns image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lighthouse_core_dns_image_pull_spec: Option<String>,
    /// submariner-routeagent image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submariner_route_agent_image_pull_spec: Option<String>,
    /// submariner-globalnet image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submariner_globalnet_image_pull_spec: Option<String>,
    /// metrics proxy image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_proxy_image_pull_spec: Option<String>,
    /// nettest image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nettest_image_pull_spec: Option<String>,
}

impl SubmarinerImagePullSpecs {
    /// Component name to image, as understood by the operator's `imageOverrides`
    pub fn overrides(&self) -> Vec<(&'static str, String)> {
        [
            ("submariner-gateway", &self.submariner_image_pull_spec),
            ("submariner-lighthouse-agent", &self.lighthouse_agent_image_pull_spec),
            ("submariner-lighthouse-coredns", &self.lighthouse_core_dns_image_pull_spec),
            ("submariner-routeagent", &self.submariner_route_agent_image_pull_spec),
            ("submariner-globalnet", &self.submariner_globalnet_image_pull_spec),
            ("submariner-metrics-proxy", &self.metrics_proxy_image_pull_spec),
            ("submariner-nettest", &self.nettest_image_pull_spec),
        ]
        .into_iter()
        .filter_map(|(component, image)| image.clone().map(|i| (component, i)))
        .collect()
    }
}

/// Dedicated gateway settings
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Number of gateways
    #[serde(default = "default_gateways")]
    pub gateways: u32,
    /// AWS instance settings
    #[serde(default)]
    pub aws: InstanceTypeConfig,
    /// Azure instance settings
    #[serde(default)]
    pub azure: InstanceTypeConfig,
    /// GCP instance settings
    #[serde(default)]
    pub gcp: InstanceTypeConfig,
    /// OpenStack instance settings
    #[serde(default)]
    pub rhos: InstanceTypeConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateways: default_gateways(),
            aws: InstanceTypeConfig::default(),
            azure: InstanceTypeConfig::default(),
            gcp: InstanceTypeConfig::default(),
            rhos: InstanceTypeConfig::default(),
        }
    }
}

/// Cloud instance type override
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceTypeConfig {
    /// Instance type; the platform default is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
}

/// Observed status of a SubmarinerConfig
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmarinerConfigStatus {
    /// Current conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Facts about the managed cluster the config applies to
    #[serde(default)]
    pub managed_cluster_info: ManagedClusterInfo,
}

/// Facts derived from the ManagedCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterInfo {
    /// Cluster name
    #[serde(default)]
    pub cluster_name: String,
    /// Distribution vendor (OpenShift, EKS, ...)
    #[serde(default)]
    pub vendor: String,
    /// Distribution version
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vendor_version: String,
    /// Infrastructure platform (AWS, Azure, GCP, OpenStack, ...)
    #[serde(default)]
    pub platform: String,
    /// Cloud region
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    /// Cluster infrastructure id
    #[serde(default, skip_serializing_if = "String::is_empty", rename = "infraId")]
    pub infra_id: String,
    /// CNI network type
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network_type: String,
    /// Availability zones of the worker nodes, reported by the agent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,
}

fn default_cable_driver() -> String {
    "libreswan".to_string()
}

fn default_ike_port() -> u16 {
    500
}

fn default_natt_port() -> u16 {
    4500
}

fn default_natt_discovery_port() -> u16 {
    4490
}

fn default_true() -> bool {
    true
}

fn default_gateways() -> u32 {
    1
}

fn default_source() -> String {
    "redhat-operators".to_string()
}

fn default_source_namespace() -> String {
    "openshift-marketplace".to_string()
}

fn default_channel() -> String {
    "stable-0.20".to_string()
}

fn default_install_plan_approval() -> String {
    "Automatic".to_string()
}
