//! Embedded templates and the typed configs they are rendered with

use std::collections::BTreeMap;

use serde::Serialize;
use submariner_addon_common::asset;
use submariner_addon_common::crd::SubmarinerConfigSpec;
use submariner_addon_common::manifests::{Asset, ManifestRenderer};

/// Broker namespace
pub const BROKER_NAMESPACE: &str = "manifests/broker/namespace.yaml";
/// Role bound by every cluster's broker service account
pub const BROKER_CLUSTER_ROLE: &str = "manifests/broker/cluster-role.yaml";
/// Broker admin service account and RBAC
pub const BROKER_ADMIN: &str = "manifests/broker/admin.yaml";

/// Broker CRDs, one per file
pub const BROKER_CRDS: [&str; 4] = [
    "manifests/crds/clusters.submariner.io.yaml",
    "manifests/crds/endpoints.submariner.io.yaml",
    "manifests/crds/gateways.submariner.io.yaml",
    "manifests/crds/serviceimports.multicluster.x-k8s.io.yaml",
];

/// Per-cluster service account and role binding in the broker namespace
pub const CLUSTER_BROKER_RBAC: &str = "manifests/cluster/broker-cluster.yaml";
/// Per-cluster agent RBAC in the cluster namespace on the hub
pub const CLUSTER_AGENT_RBAC: &str = "manifests/cluster/agent-rbac.yaml";

/// Operator install namespace
pub const OPERATOR_NAMESPACE: &str = "manifests/operator/namespace.yaml";
/// OLM OperatorGroup
pub const OPERATOR_GROUP: &str = "manifests/operator/operator-group.yaml";
/// OLM Subscription
pub const OPERATOR_SUBSCRIPTION: &str = "manifests/operator/subscription.yaml";
/// Privileged SCC ClusterRole (OpenShift only)
pub const OPERATOR_SCC_ROLE: &str = "manifests/operator/scc-cluster-role.yaml";
/// Privileged SCC ClusterRoleBinding (OpenShift only)
pub const OPERATOR_SCC_BINDING: &str = "manifests/operator/scc-cluster-role-binding.yaml";
/// Addon agent deployment
pub const OPERATOR_AGENT: &str = "manifests/operator/agent.yaml";

/// The Submariner CR
pub const SUBMARINER_RESOURCE: &str = "manifests/resource/submariner.yaml";

static ASSETS: &[Asset] = &[
    asset!("manifests/broker/namespace.yaml"),
    asset!("manifests/broker/cluster-role.yaml"),
    asset!("manifests/broker/admin.yaml"),
    asset!("manifests/crds/clusters.submariner.io.yaml"),
    asset!("manifests/crds/endpoints.submariner.io.yaml"),
    asset!("manifests/crds/gateways.submariner.io.yaml"),
    asset!("manifests/crds/serviceimports.multicluster.x-k8s.io.yaml"),
    asset!("manifests/cluster/broker-cluster.yaml"),
    asset!("manifests/cluster/agent-rbac.yaml"),
    asset!("manifests/operator/namespace.yaml"),
    asset!("manifests/operator/operator-group.yaml"),
    asset!("manifests/operator/subscription.yaml"),
    asset!("manifests/operator/scc-cluster-role.yaml"),
    asset!("manifests/operator/scc-cluster-role-binding.yaml"),
    asset!("manifests/operator/agent.yaml"),
    asset!("manifests/resource/submariner.yaml"),
];

/// Renderer over every hub template
pub fn renderer() -> ManifestRenderer {
    ManifestRenderer::new(ASSETS)
}

/// Namespace the addon agent runs in on managed clusters
pub const AGENT_NAMESPACE: &str = "open-cluster-management-agent-addon";

/// Service accounts of Submariner components that need the privileged SCC
pub const PRIVILEGED_SERVICE_ACCOUNTS: [&str; 6] = [
    "submariner-gateway",
    "submariner-routeagent",
    "submariner-globalnet",
    "submariner-diagnose",
    "submariner-metrics-proxy",
    "submariner-lighthouse-coredns",
];

/// Values for broker templates
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BrokerConfig {
    /// Cluster set name
    pub cluster_set: String,
    /// `<set>-broker`
    pub broker_namespace: String,
}

/// Values for per-cluster RBAC templates
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterRbacConfig {
    /// Managed cluster name
    pub cluster_name: String,
    /// Broker namespace of the cluster's set
    pub broker_namespace: String,
}

/// Values for the operator and Submariner CR templates
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AgentManifestConfig {
    /// Managed cluster name, also the Submariner cluster ID
    #[serde(rename = "ClusterName")]
    pub cluster_name: String,
    /// Broker namespace
    #[serde(rename = "BrokerNamespace")]
    pub broker_namespace: String,
    /// Hub API server URL
    #[serde(rename = "BrokerApiServer")]
    pub broker_api_server: String,
    /// Broker service-account token
    #[serde(rename = "BrokerToken")]
    pub broker_token: String,
    /// Broker CA bundle, base64
    #[serde(rename = "BrokerCA")]
    pub broker_ca: String,
    /// IPsec pre-shared key, base64
    #[serde(rename = "IPSecPSK")]
    pub ipsec_psk: String,
    /// Operator install namespace on the spoke
    #[serde(rename = "InstallNamespace")]
    pub install_namespace: String,
    /// OpenShift clusters also get the SCC bindings
    #[serde(rename = "IsOpenShift")]
    pub is_openshift: bool,
    /// Cable driver
    #[serde(rename = "CableDriver")]
    pub cable_driver: String,
    /// IKE port
    #[serde(rename = "IPSecIKEPort")]
    pub ipsec_ike_port: u16,
    /// NAT-T port
    #[serde(rename = "IPSecNATTPort")]
    pub ipsec_natt_port: u16,
    /// NAT traversal
    #[serde(rename = "NATEnabled")]
    pub nat_enabled: bool,
    /// Debug logging and IPsec debug
    #[serde(rename = "Debug")]
    pub debug: bool,
    /// Globalnet CIDR
    #[serde(rename = "GlobalCIDR")]
    pub global_cidr: Option<String>,
    /// Gateway LoadBalancer
    #[serde(rename = "LoadBalancerEnabled")]
    pub load_balancer_enabled: bool,
    /// Air-gapped install
    #[serde(rename = "AirGappedDeployment")]
    pub air_gapped_deployment: bool,
    /// Component image overrides
    #[serde(rename = "ImageOverrides")]
    pub image_overrides: BTreeMap<String, String>,
    /// Catalog source
    #[serde(rename = "SubscriptionSource")]
    pub subscription_source: String,
    /// Catalog source namespace
    #[serde(rename = "SubscriptionSourceNamespace")]
    pub subscription_source_namespace: String,
    /// Subscription channel
    #[serde(rename = "SubscriptionChannel")]
    pub subscription_channel: String,
    /// Pinned CSV
    #[serde(rename = "SubscriptionStartingCSV")]
    pub subscription_starting_csv: Option<String>,
    /// Automatic or Manual
    #[serde(rename = "InstallPlanApproval")]
    pub install_plan_approval: String,
    /// Service accounts bound to the privileged SCC
    #[serde(rename = "PrivilegedServiceAccounts")]
    pub privileged_service_accounts: Vec<String>,
    /// Addon agent image; no agent deployment when unset
    #[serde(rename = "AgentImage")]
    pub agent_image: Option<String>,
    /// Namespace the addon agent runs in
    #[serde(rename = "AgentNamespace")]
    pub agent_namespace: String,
}

/// Broker connection details read from the hub
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerInfo {
    /// Broker namespace
    pub namespace: String,
    /// Hub API server URL
    pub api_server: String,
    /// Service-account token
    pub token: String,
    /// CA bundle, base64
    pub ca: String,
    /// IPsec PSK, base64
    pub psk: String,
}

impl AgentManifestConfig {
    /// Combine broker details, the cluster and its SubmarinerConfig spec
    pub fn new(
        cluster_name: &str,
        is_openshift: bool,
        broker: &BrokerInfo,
        spec: &SubmarinerConfigSpec,
        install_namespace: &str,
        agent_image: Option<&str>,
    ) -> Self {
        let subscription = &spec.subscription_config;
        Self {
            cluster_name: cluster_name.to_string(),
            broker_namespace: broker.namespace.clone(),
            broker_api_server: broker.api_server.clone(),
            broker_token: broker.token.clone(),
            broker_ca: broker.ca.clone(),
            ipsec_psk: broker.psk.clone(),
            install_namespace: install_namespace.to_string(),
            is_openshift,
            cable_driver: spec.cable_driver.clone(),
            ipsec_ike_port: spec.ipsec_ike_port,
            ipsec_natt_port: spec.ipsec_natt_port,
            nat_enabled: spec.natt_enable,
            debug: spec.debug,
            global_cidr: spec.global_cidr.clone().filter(|c| !c.is_empty()),
            load_balancer_enabled: spec.load_balancer_enable,
            air_gapped_deployment: spec.air_gapped_deployment,
            image_overrides: spec
                .image_pull_specs
                .overrides()
                .into_iter()
                .map(|(component, image)| (component.to_string(), image))
                .collect(),
            subscription_source: subscription.source.clone(),
            subscription_source_namespace: subscription.source_namespace.clone(),
            subscription_channel: subscription.channel.clone(),
            subscription_starting_csv: subscription
                .starting_csv
                .clone()
                .filter(|c| !c.is_empty()),
            install_plan_approval: subscription.install_plan_approval.clone(),
            privileged_service_accounts: PRIVILEGED_SERVICE_ACCOUNTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            agent_image: agent_image.map(str::to_string),
            agent_namespace: AGENT_NAMESPACE.to_string(),
        }
    }

    /// Templates of the operator ManifestWork
    pub fn operator_files(&self) -> Vec<&'static str> {
        let mut files = vec![OPERATOR_NAMESPACE, OPERATOR_GROUP, OPERATOR_SUBSCRIPTION];
        if self.is_openshift {
            files.extend([OPERATOR_SCC_ROLE, OPERATOR_SCC_BINDING]);
        }
        if self.agent_image.is_some() {
            files.push(OPERATOR_AGENT);
        }
        files
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use submariner_addon_common::crd::SubmarinerImagePullSpecs;

    pub(crate) fn broker() -> BrokerInfo {
        BrokerInfo {
            namespace: "set1-broker".to_string(),
            api_server: "https://api.hub.example.com:6443".to_string(),
            token: "broker-token".to_string(),
            ca: "Y2EtYnVuZGxl".to_string(),
            psk: "cHNr".to_string(),
        }
    }

    pub(crate) fn agent_config(is_openshift: bool) -> AgentManifestConfig {
        AgentManifestConfig::new(
            "cluster1",
            is_openshift,
            &broker(),
            &SubmarinerConfigSpec::default(),
            "submariner-operator",
            None,
        )
    }

    #[test]
    fn every_file_renders() {
        let renderer = renderer();
        let broker = BrokerConfig {
            cluster_set: "set1".to_string(),
            broker_namespace: "set1-broker".to_string(),
        };
        let rbac = ClusterRbacConfig {
            cluster_name: "cluster1".to_string(),
            broker_namespace: "set1-broker".to_string(),
        };
        let mut agent = agent_config(true);
        agent.agent_image = Some("quay.io/stolostron/submariner-addon:latest".to_string());

        for file in [BROKER_NAMESPACE, BROKER_CLUSTER_ROLE, BROKER_ADMIN] {
            renderer.render_manifests(file, &broker).unwrap();
        }
        for file in BROKER_CRDS {
            renderer.render_manifests(file, &()).unwrap();
        }
        for file in [CLUSTER_BROKER_RBAC, CLUSTER_AGENT_RBAC] {
            renderer.render_manifests(file, &rbac).unwrap();
        }
        for file in agent.operator_files() {
            assert!(!renderer.render_values(file, &agent).unwrap().is_empty());
        }
        renderer.render_values(SUBMARINER_RESOURCE, &agent).unwrap();
    }

    #[test]
    fn scc_files_only_for_openshift() {
        assert!(agent_config(true).operator_files().contains(&OPERATOR_SCC_ROLE));
        assert!(!agent_config(false).operator_files().contains(&OPERATOR_SCC_ROLE));
        assert!(!agent_config(false).operator_files().contains(&OPERATOR_SCC_BINDING));
    }

    #[test]
    fn submariner_cr_carries_broker_and_ipsec_settings() {
        let mut spec = SubmarinerConfigSpec {
            global_cidr: Some("242.0.0.0/8".to_string()),
            image_pull_specs: SubmarinerImagePullSpecs {
                submariner_image_pull_spec: Some("quay.io/submariner/gw:0.20".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        spec.ipsec_natt_port = 4501;
        let config = AgentManifestConfig::new(
            "cluster1",
            false,
            &broker(),
            &spec,
            "submariner-operator",
            None,
        );

        let values = renderer().render_values(SUBMARINER_RESOURCE, &config).unwrap();
        let cr = &values[0]["spec"];
        assert_eq!(cr["brokerK8sApiServer"], "https://api.hub.example.com:6443");
        assert_eq!(cr["brokerK8sRemoteNamespace"], "set1-broker");
        assert_eq!(cr["ceIPSecNATTPort"], 4501);
        assert_eq!(cr["ceIPSecPSK"], "cHNr");
        assert_eq!(cr["clusterID"], "cluster1");
        assert_eq!(cr["natEnabled"], true);
        assert_eq!(cr["globalCIDR"], "242.0.0.0/8");
        assert_eq!(cr["imageOverrides"]["submariner-gateway"], "quay.io/submariner/gw:0.20");
    }

    #[test]
    fn submariner_cr_flags_are_booleans() {
        let values = renderer()
            .render_values(SUBMARINER_RESOURCE, &agent_config(false))
            .unwrap();
        let cr = &values[0]["spec"];
        for field in [
            "natEnabled",
            "debug",
            "ceIPSecDebug",
            "loadBalancerEnabled",
            "airGappedDeployment",
            "serviceDiscoveryEnabled",
        ] {
            assert!(cr[field].is_boolean(), "{field} rendered as {}", cr[field]);
        }
        assert_eq!(cr["debug"], false);
        assert!(cr["ceIPSecIKEPort"].is_u64());
    }

    #[test]
    fn subscription_pins_csv_only_when_set() {
        let mut config = agent_config(false);
        let values = renderer().render_values(OPERATOR_SUBSCRIPTION, &config).unwrap();
        assert!(values[0]["spec"].get("startingCSV").is_none());
        assert_eq!(values[0]["spec"]["channel"], "stable-0.20");

        config.subscription_starting_csv = Some("submariner.v0.20.1".to_string());
        let values = renderer().render_values(OPERATOR_SUBSCRIPTION, &config).unwrap();
        assert_eq!(values[0]["spec"]["startingCSV"], "submariner.v0.20.1");
    }
}
