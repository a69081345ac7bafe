//! Facts about a managed cluster, as recorded on its SubmarinerConfig

use kube::ResourceExt;
use submariner_addon_common::crd::{
    ManagedCluster, ManagedClusterInfo, CLAIM_INFRA_ID, CLAIM_OCP_VERSION, CLAIM_PLATFORM,
    CLAIM_PRODUCT, CLAIM_REGION, CLOUD_LABEL, VENDOR_LABEL,
};

/// Derive `managedClusterInfo` from the cluster's labels and claims.
///
/// Claims win over labels. The network type and worker zones are discovered
/// on the spoke, so the values already recorded in `existing` are kept.
pub fn managed_cluster_info(cluster: &ManagedCluster, existing: &ManagedClusterInfo) -> ManagedClusterInfo {
    let vendor = cluster
        .label(VENDOR_LABEL)
        .or_else(|| cluster.claim(CLAIM_PRODUCT))
        .unwrap_or_default();
    let vendor_version = cluster
        .claim(CLAIM_OCP_VERSION)
        .map(str::to_string)
        .or_else(|| {
            cluster
                .status
                .as_ref()
                .map(|s| s.version.kubernetes.clone())
        })
        .unwrap_or_default();

    ManagedClusterInfo {
        cluster_name: cluster.name_any(),
        vendor: vendor.to_string(),
        vendor_version,
        platform: cluster
            .claim(CLAIM_PLATFORM)
            .or_else(|| cluster.label(CLOUD_LABEL))
            .unwrap_or_default()
            .to_string(),
        region: cluster.claim(CLAIM_REGION).unwrap_or_default().to_string(),
        infra_id: cluster.claim(CLAIM_INFRA_ID).unwrap_or_default().to_string(),
        network_type: existing.network_type.clone(),
        zones: existing.zones.clone(),
    }
}
