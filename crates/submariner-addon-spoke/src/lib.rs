//! Managed-cluster agent of the Submariner addon
//!
//! Every controller reads the managed cluster through [`client`] and writes
//! its findings to hub objects in the cluster namespace:
//!
//! - `config`: labels gateway nodes for the cluster's SubmarinerConfig
//! - `gateways`, `connections`, `deployment`: ManagedClusterAddOn conditions
//! - `diagnose`: runs the checks a SubmarinerDiagnoseConfig asks for

#![deny(missing_docs)]

pub mod addon;
pub mod client;
pub mod config;
pub mod connections;
pub mod deployment;
pub mod diagnose;
pub mod gateways;

use std::sync::Arc;

use submariner_addon_common::controller::ReconcileBackoff;
use submariner_addon_common::crd::{ManagedClusterAddOn, SubmarinerConfig, SubmarinerDiagnoseConfig};
use submariner_addon_common::events::EventPublisher;
use submariner_addon_common::status::ResourceClient;

pub use client::{ClusterInspector, KubeClusterInspector, KubeNodeClient, NodeClient};

/// State shared by every spoke controller
pub struct SpokeContext {
    /// Name of this managed cluster, also its namespace on the hub
    pub cluster_name: String,
    /// Hub: ManagedClusterAddOns in the cluster namespace
    pub addons: Arc<dyn ResourceClient<ManagedClusterAddOn>>,
    /// Hub: SubmarinerConfigs in the cluster namespace
    pub configs: Arc<dyn ResourceClient<SubmarinerConfig>>,
    /// Hub: SubmarinerDiagnoseConfigs in the cluster namespace
    pub diagnoses: Arc<dyn ResourceClient<SubmarinerDiagnoseConfig>>,
    /// Spoke nodes
    pub nodes: Arc<dyn NodeClient>,
    /// Spoke Submariner install
    pub inspector: Arc<dyn ClusterInspector>,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Requeue backoff, keyed `<controller>/<object>`
    pub backoff: ReconcileBackoff,
}

impl SpokeContext {
    pub(crate) fn backoff_key(controller: &str, name: &str) -> String {
        format!("{controller}/{name}")
    }
}
