//! Typed views of the Open Cluster Management resources the addon reads and writes
//!
//! Only the fields the addon touches are modelled; everything else round-trips
//! through the API server untouched because writes go through the status
//! subresource or replace the whole object we previously read.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Label naming the ManagedClusterSet a cluster belongs to
pub const CLUSTER_SET_LABEL: &str = "cluster.open-cluster-management.io/clusterset";
/// Label naming the cluster distribution vendor
pub const VENDOR_LABEL: &str = "vendor";
/// Label naming the infrastructure platform
pub const CLOUD_LABEL: &str = "cloud";
/// Vendor value for OpenShift clusters
pub const VENDOR_OPENSHIFT: &str = "OpenShift";

/// Cluster claim: infrastructure platform
pub const CLAIM_PLATFORM: &str = "platform.open-cluster-management.io";
/// Cluster claim: cloud region
pub const CLAIM_REGION: &str = "region.open-cluster-management.io";
/// Cluster claim: OpenShift infrastructure id
pub const CLAIM_INFRA_ID: &str = "infrastructure.openshift.io";
/// Cluster claim: product (OpenShift, EKS, ...)
pub const CLAIM_PRODUCT: &str = "product.open-cluster-management.io";
/// Cluster claim: OpenShift version
pub const CLAIM_OCP_VERSION: &str = "version.openshift.io";

/// Name of the addon and its ManagedClusterAddOn
pub const ADDON_NAME: &str = "submariner";

/// ManagedCluster spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.open-cluster-management.io",
    version = "v1",
    kind = "ManagedCluster",
    status = "ManagedClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSpec {
    /// Hub accepted the cluster's registration
    #[serde(default)]
    pub hub_accepts_client: bool,
}

/// ManagedCluster status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterStatus {
    /// Current conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Facts reported by the klusterlet
    #[serde(default)]
    pub cluster_claims: Vec<ClusterClaim>,
    /// Reported versions
    #[serde(default)]
    pub version: ManagedClusterVersion,
}

/// A name/value fact reported by the spoke
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ClusterClaim {
    /// Claim name
    pub name: String,
    /// Claim value
    #[serde(default)]
    pub value: String,
}

/// Versions reported by the spoke
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ManagedClusterVersion {
    /// Kubernetes version
    #[serde(default)]
    pub kubernetes: String,
}

impl ManagedCluster {
    /// Value of a cluster claim, if reported
    pub fn claim(&self, name: &str) -> Option<&str> {
        self.status
            .as_ref()?
            .cluster_claims
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }

    /// Value of a label, if set
    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(key))
            .map(String::as_str)
    }

    /// The cluster set this cluster belongs to
    pub fn cluster_set(&self) -> Option<&str> {
        self.label(CLUSTER_SET_LABEL).filter(|s| !s.is_empty())
    }

    /// True for OpenShift clusters
    pub fn is_openshift(&self) -> bool {
        self.label(VENDOR_LABEL) == Some(VENDOR_OPENSHIFT)
    }
}

/// ManagedClusterSet spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.open-cluster-management.io",
    version = "v1beta2",
    kind = "ManagedClusterSet",
    status = "ManagedClusterSetStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSetSpec {
    /// How member clusters are selected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_selector: Option<ClusterSelector>,
}

/// Cluster set member selection
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSelector {
    /// ExclusiveClusterSetLabel or LabelSelector
    #[serde(default)]
    pub selector_type: String,
}

/// ManagedClusterSet status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ManagedClusterSetStatus {
    /// Current conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// ManagedClusterAddOn spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "addon.open-cluster-management.io",
    version = "v1alpha1",
    kind = "ManagedClusterAddOn",
    namespaced,
    status = "ManagedClusterAddOnStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterAddOnSpec {
    /// Namespace the agent is installed into on the spoke
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_namespace: Option<String>,
}

/// ManagedClusterAddOn status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterAddOnStatus {
    /// Current conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// ManifestWork spec: a bundle of raw objects applied on the spoke
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "work.open-cluster-management.io",
    version = "v1",
    kind = "ManifestWork",
    namespaced,
    status = "ManifestWorkStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ManifestWorkSpec {
    /// Objects to apply
    #[serde(default)]
    pub workload: ManifestsTemplate,
    /// How applied objects are deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_option: Option<DeleteOption>,
}

/// Objects carried by a ManifestWork
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ManifestsTemplate {
    /// Raw Kubernetes objects
    #[serde(default)]
    pub manifests: Vec<serde_json::Value>,
}

/// Deletion behaviour of a ManifestWork
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOption {
    /// Foreground, Orphan or SelectivelyOrphan
    pub propagation_policy: String,
}

/// ManifestWork status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ManifestWorkStatus {
    /// Current conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// ClusterManager spec; the addon only watches its lifecycle
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "operator.open-cluster-management.io",
    version = "v1",
    kind = "ClusterManager"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterManagerSpec {
    /// Registration controller image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_image_pull_spec: Option<String>,
    /// Remaining fields, preserved on write
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}
