//! Managed-cluster access used by the spoke controllers

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Node};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client};
use serde_json::json;
use submariner_addon_common::crd::{
    RouteAgent, Submariner, Subscription, SUBMARINER_CR_NAME, SUBMARINER_PACKAGE,
};
use submariner_addon_common::yaml::parse_document;
use submariner_addon_common::{Error, GATEWAY_LABEL};

#[cfg(test)]
use mockall::automock;

const KUBE_PROXY_NAMESPACE: &str = "kube-system";
const KUBE_PROXY_CONFIG_MAP: &str = "kube-proxy";
const KUBE_PROXY_CONFIG_KEY: &str = "config.conf";

/// Node listing and gateway labelling
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Every node of the cluster
    async fn list_nodes(&self) -> Result<Vec<Node>, Error>;

    /// Set `submariner.io/gateway=true` on `node`
    async fn label_gateway(&self, node: &str) -> Result<(), Error>;

    /// Remove `submariner.io/gateway` from `node`
    async fn unlabel_gateway(&self, node: &str) -> Result<(), Error>;
}

/// Read-only view of the Submariner deployment on the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterInspector: Send + Sync {
    /// The Submariner CR
    async fn submariner(&self) -> Result<Option<Submariner>, Error>;

    /// RouteAgents in the install namespace
    async fn route_agents(&self) -> Result<Vec<RouteAgent>, Error>;

    /// The operator Subscription
    async fn subscription(&self) -> Result<Option<Subscription>, Error>;

    /// A Deployment in the install namespace
    async fn deployment(&self, name: &str) -> Result<Option<Deployment>, Error>;

    /// A DaemonSet in the install namespace
    async fn daemon_set(&self, name: &str) -> Result<Option<DaemonSet>, Error>;

    /// Names of every DaemonSet in the cluster
    async fn daemon_set_names(&self) -> Result<Vec<String>, Error>;

    /// API server `gitVersion`
    async fn server_version(&self) -> Result<String, Error>;

    /// kube-proxy `mode`, `None` when kube-proxy is not configured through its ConfigMap
    async fn kube_proxy_mode(&self) -> Result<Option<String>, Error>;
}

/// [`NodeClient`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeNodeClient {
    client: Client,
}

impl KubeNodeClient {
    /// Wrap a managed-cluster client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn patch_label(&self, node: &str, value: serde_json::Value) -> Result<(), Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        let patch = json!({ "metadata": { "labels": { GATEWAY_LABEL: value } } });
        api.patch(node, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl NodeClient for KubeNodeClient {
    async fn list_nodes(&self) -> Result<Vec<Node>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn label_gateway(&self, node: &str) -> Result<(), Error> {
        self.patch_label(node, json!("true")).await
    }

    async fn unlabel_gateway(&self, node: &str) -> Result<(), Error> {
        self.patch_label(node, serde_json::Value::Null).await
    }
}

/// [`ClusterInspector`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeClusterInspector {
    client: Client,
    namespace: String,
}

impl KubeClusterInspector {
    /// Inspect the Submariner install in `namespace`
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl ClusterInspector for KubeClusterInspector {
    async fn submariner(&self) -> Result<Option<Submariner>, Error> {
        let api: Api<Submariner> = Api::namespaced(self.client.clone(), &self.namespace);
        Ok(api.get_opt(SUBMARINER_CR_NAME).await?)
    }

    async fn route_agents(&self) -> Result<Vec<RouteAgent>, Error> {
        let api: Api<RouteAgent> = Api::namespaced(self.client.clone(), &self.namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn subscription(&self) -> Result<Option<Subscription>, Error> {
        let api: Api<Subscription> = Api::namespaced(self.client.clone(), &self.namespace);
        Ok(api.get_opt(SUBMARINER_PACKAGE).await?)
    }

    async fn deployment(&self, name: &str) -> Result<Option<Deployment>, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn daemon_set(&self, name: &str) -> Result<Option<DaemonSet>, Error> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), &self.namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn daemon_set_names(&self) -> Result<Vec<String>, Error> {
        let api: Api<DaemonSet> = Api::all(self.client.clone());
        Ok(api
            .list_metadata(&ListParams::default())
            .await?
            .items
            .into_iter()
            .filter_map(|ds| ds.metadata.name)
            .collect())
    }

    async fn server_version(&self) -> Result<String, Error> {
        Ok(self.client.apiserver_version().await?.git_version)
    }

    async fn kube_proxy_mode(&self) -> Result<Option<String>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), KUBE_PROXY_NAMESPACE);
        let Some(config_map) = api.get_opt(KUBE_PROXY_CONFIG_MAP).await? else {
            return Ok(None);
        };
        let Some(config) = config_map
            .data
            .as_ref()
            .and_then(|d| d.get(KUBE_PROXY_CONFIG_KEY))
        else {
            return Ok(None);
        };
        Ok(kube_proxy_mode_from_config(config))
    }
}

/// `mode` of a KubeProxyConfiguration document; empty means iptables
pub fn kube_proxy_mode_from_config(config: &str) -> Option<String> {
    let doc = parse_document(config).ok()?;
    let mode = doc.get("mode").and_then(|m| m.as_str()).unwrap_or_default();
    Some(if mode.is_empty() { "iptables" } else { mode }.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kube_proxy_mode_defaults_to_iptables() {
        let config = "apiVersion: kubeproxy.config.k8s.io/v1alpha1\nkind: KubeProxyConfiguration\nmode: \"\"\n";
        assert_eq!(kube_proxy_mode_from_config(config).as_deref(), Some("iptables"));
    }

    #[test]
    fn kube_proxy_mode_reads_ipvs() {
        let config = "kind: KubeProxyConfiguration\nmode: ipvs\nipvs:\n  scheduler: rr\n";
        assert_eq!(kube_proxy_mode_from_config(config).as_deref(), Some("ipvs"));
    }
}
