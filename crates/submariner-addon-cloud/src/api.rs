//! Seams between providers and the backends that change cloud state

use async_trait::async_trait;
use serde_json::Value;
use submariner_addon_common::Error;

use crate::platform::Platform;
use crate::ports::PortSpec;

/// Identifies the cluster whose environment is being changed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloudContext {
    /// Platform of the cluster
    pub platform: Platform,
    /// Managed cluster name (also its namespace on the hub)
    pub cluster_name: String,
    /// Cloud region
    pub region: String,
    /// Infrastructure id of the cluster
    pub infra_id: String,
}

/// Where and how gateway machines run in one zone
#[derive(Clone, Debug, PartialEq)]
pub struct GatewayPlacement {
    /// Availability zone
    pub zone: String,
    /// Machines to run in the zone
    pub replicas: u32,
    /// Platform machine provider spec
    pub provider_spec: Value,
}

/// Everything a [`GatewayDeployer`] needs to create gateway instances
#[derive(Clone, Debug, PartialEq)]
pub struct GatewayDeployInput {
    /// Target cluster
    pub context: CloudContext,
    /// Machine type for every gateway
    pub instance_type: String,
    /// Total gateways requested
    pub gateways: u32,
    /// Per-zone placement
    pub placements: Vec<GatewayPlacement>,
}

/// Receives progress of long-running cloud steps
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// A step started
    async fn start(&self, message: &str);

    /// The current step succeeded
    async fn succeeded(&self, message: &str);

    /// The current step failed
    async fn failed(&self, error: &Error);
}

/// Opens and closes the firewall for Submariner traffic
#[async_trait]
pub trait CloudPrepare: Send + Sync {
    /// Make `ports` reachable on the cluster's gateways and nodes
    async fn prepare_for_submariner(
        &self,
        context: &CloudContext,
        ports: &[PortSpec],
        reporter: &dyn StatusReporter,
    ) -> Result<(), Error>;

    /// Revert everything `prepare_for_submariner` opened
    async fn cleanup_after_submariner(
        &self,
        context: &CloudContext,
        reporter: &dyn StatusReporter,
    ) -> Result<(), Error>;
}

/// Creates and removes dedicated gateway instances
#[async_trait]
pub trait GatewayDeployer: Send + Sync {
    /// Ensure the requested gateways exist
    async fn deploy(
        &self,
        input: &GatewayDeployInput,
        reporter: &dyn StatusReporter,
    ) -> Result<(), Error>;

    /// Remove every gateway created by `deploy`
    async fn cleanup(
        &self,
        context: &CloudContext,
        reporter: &dyn StatusReporter,
    ) -> Result<(), Error>;
}

/// Spread `gateways` across `zones`, filling zones in order
pub fn spread_across_zones(gateways: u32, zones: &[String]) -> Vec<(String, u32)> {
    if zones.is_empty() || gateways == 0 {
        return Vec::new();
    }
    let mut counts = vec![0u32; zones.len()];
    for i in 0..gateways as usize {
        counts[i % zones.len()] += 1;
    }
    zones
        .iter()
        .cloned()
        .zip(counts)
        .filter(|(_, n)| *n > 0)
        .collect()
}
