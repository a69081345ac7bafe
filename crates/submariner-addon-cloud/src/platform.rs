//! Cloud platforms with gateway preparation support

use std::fmt;
use std::str::FromStr;

use submariner_addon_common::crd::{
    ManagedCluster, ManagedClusterInfo, CLAIM_PLATFORM, CLOUD_LABEL,
};
use submariner_addon_common::Error;

/// Supported cloud platforms
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Platform {
    /// Amazon Web Services
    Aws,
    /// Microsoft Azure
    Azure,
    /// Google Cloud Platform
    Gcp,
    /// Red Hat OpenStack
    Rhos,
}

impl Platform {
    /// Every platform, in registry order
    pub const ALL: [Platform; 4] = [Platform::Aws, Platform::Azure, Platform::Gcp, Platform::Rhos];

    /// Platform of a managed cluster: the platform claim wins over the `cloud` label
    pub fn of(cluster: &ManagedCluster) -> Option<Platform> {
        cluster
            .claim(CLAIM_PLATFORM)
            .or_else(|| cluster.label(CLOUD_LABEL))
            .and_then(|p| p.parse().ok())
    }

    /// Platform recorded in a SubmarinerConfig's cluster info
    pub fn from_cluster_info(info: &ManagedClusterInfo) -> Option<Platform> {
        info.platform.parse().ok()
    }

    /// Machine types used when the config does not name one
    pub fn default_instance_type(&self) -> &'static str {
        match self {
            Platform::Aws => "c5d.large",
            Platform::Azure => "Standard_F4s_v2",
            Platform::Gcp => "n1-standard-4",
            Platform::Rhos => "PnTAE.CPU_4_Memory_8192_Disk_50",
        }
    }

    /// Conventional zone names for `region`
    ///
    /// Only used until the agent has reported the zones of the cluster's
    /// worker nodes; regions with other zone sets need that report.
    pub fn default_zones(&self, region: &str) -> Vec<String> {
        match self {
            Platform::Aws => ["a", "b", "c"]
                .iter()
                .map(|z| format!("{region}{z}"))
                .collect(),
            Platform::Azure => ["1", "2", "3"].iter().map(|z| z.to_string()).collect(),
            Platform::Gcp => ["a", "b", "c"]
                .iter()
                .map(|z| format!("{region}-{z}"))
                .collect(),
            Platform::Rhos => vec!["nova".to_string()],
        }
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aws" | "amazon" => Ok(Platform::Aws),
            "azure" => Ok(Platform::Azure),
            "gcp" | "google" => Ok(Platform::Gcp),
            "openstack" | "rhos" => Ok(Platform::Rhos),
            _ => Err(Error::validation(format!(
                "unsupported platform: {s}, expected one of: AWS, Azure, GCP, OpenStack"
            ))),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Aws => write!(f, "AWS"),
            Platform::Azure => write!(f, "Azure"),
            Platform::Gcp => write!(f, "GCP"),
            Platform::Rhos => write!(f, "RHOS"),
        }
    }
}
