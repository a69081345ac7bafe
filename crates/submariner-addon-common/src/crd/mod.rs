//! Custom resources owned or consumed by the Submariner addon

mod diagnose_config;
mod ocm;
mod olm;
mod submariner;
mod submariner_config;
mod types;

pub use diagnose_config::{
    DiagnoseCheck, DiagnoseOutcome, DiagnoseResult, SubmarinerDiagnoseConfig,
    SubmarinerDiagnoseSpec, SubmarinerDiagnoseStatus, CONDITION_DIAGNOSE_COMPLETED,
};
pub use ocm::{
    ClusterClaim, ClusterManager, ClusterManagerSpec, ClusterSelector, DeleteOption,
    ManagedCluster, ManagedClusterAddOn, ManagedClusterAddOnSpec, ManagedClusterAddOnStatus,
    ManagedClusterSet, ManagedClusterSetSpec, ManagedClusterSetStatus, ManagedClusterSpec,
    ManagedClusterStatus, ManagedClusterVersion, ManifestWork, ManifestWorkSpec,
    ManifestWorkStatus, ManifestsTemplate, ADDON_NAME, CLAIM_INFRA_ID, CLAIM_OCP_VERSION,
    CLAIM_PLATFORM, CLAIM_PRODUCT, CLAIM_REGION, CLOUD_LABEL, CLUSTER_SET_LABEL, VENDOR_LABEL,
    VENDOR_OPENSHIFT,
};
pub use olm::{Subscription, SubscriptionSpec, SubscriptionStatus, SUBMARINER_PACKAGE};
pub use submariner::{
    Connection, EndpointSpec, GatewayStatus, RemoteEndpoint, RouteAgent, RouteAgentSpec,
    RouteAgentStatus, Submariner, SubmarinerSpec, SubmarinerStatus, CONNECTION_CONNECTED,
    SUBMARINER_CR_NAME,
};
pub use submariner_config::{
    GatewayConfig, InstanceTypeConfig, ManagedClusterInfo, SubmarinerConfig,
    SubmarinerConfigSpec, SubmarinerConfigStatus, SubmarinerImagePullSpecs, SubscriptionConfig,
    CONDITION_CONFIG_APPLIED, CONDITION_ENV_PREPARED, CONDITION_GATEWAY_NODES_LABELED,
    CONFIG_FINALIZER, REASON_CONFIG_APPLIED, REASON_CONFIG_APPLY_FAILED,
    REASON_ENV_PREPARATION_FAILED, REASON_ENV_PREPARED, REASON_GATEWAY_NODES_LABELED,
    REASON_GATEWAY_NODES_LABELING_FAILED, REASON_MANAGED_CLUSTER_ON_CLOUD,
    SUBMARINER_CONFIG_NAME,
};
pub use types::{Condition, ConditionStatus, LocalSecretReference};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// CRDs owned by the addon
pub fn addon_crds() -> Vec<CustomResourceDefinition> {
    vec![SubmarinerConfig::crd(), SubmarinerDiagnoseConfig::crd()]
}
