//! Namespaced hub clients for the agent controller

use std::sync::Arc;

use kube::{Api, Client};
use submariner_addon_common::crd::{ManagedClusterAddOn, SubmarinerConfig};
use submariner_addon_common::status::ResourceClient;

#[cfg(test)]
use mockall::automock;

/// Hands out clients scoped to one cluster namespace
#[cfg_attr(test, automock)]
pub trait ClusterNamespaceClients: Send + Sync {
    /// ManagedClusterAddOns in `namespace`
    fn addons(&self, namespace: &str) -> Arc<dyn ResourceClient<ManagedClusterAddOn>>;

    /// SubmarinerConfigs in `namespace`
    fn configs(&self, namespace: &str) -> Arc<dyn ResourceClient<SubmarinerConfig>>;
}

/// [`ClusterNamespaceClients`] backed by `kube::Api`
#[derive(Clone)]
pub struct KubeClusterNamespaceClients {
    client: Client,
}

impl KubeClusterNamespaceClients {
    /// Wrap a hub client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl ClusterNamespaceClients for KubeClusterNamespaceClients {
    fn addons(&self, namespace: &str) -> Arc<dyn ResourceClient<ManagedClusterAddOn>> {
        Arc::new(Api::<ManagedClusterAddOn>::namespaced(self.client.clone(), namespace))
    }

    fn configs(&self, namespace: &str) -> Arc<dyn ResourceClient<SubmarinerConfig>> {
        Arc::new(Api::<SubmarinerConfig>::namespaced(self.client.clone(), namespace))
    }
}
