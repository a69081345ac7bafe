//! Gateway node status controller
//!
//! Node events all map to the one addon key, so a burst of node updates
//! collapses into a single node listing.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Node;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use submariner_addon_common::crd::{Condition, ManagedClusterAddOn};
use submariner_addon_common::metrics::ReconcileTimer;
use submariner_addon_common::{Error, GATEWAY_LABEL};
use tracing::{debug, instrument};

use crate::addon::{
    set_addon_conditions, CONDITION_GATEWAY_NODES_LABELED, REASON_GATEWAY_NODES_LABELED,
    REASON_GATEWAY_NODES_UNLABELED,
};
use crate::SpokeContext;

const CONTROLLER: &str = "spoke-gateways";

/// True when `node` carries `submariner.io/gateway=true`
pub fn is_gateway(node: &Node) -> bool {
    node.labels().get(GATEWAY_LABEL).map(String::as_str) == Some("true")
}

/// Names of the gateway nodes, sorted
pub fn gateway_nodes(nodes: &[Node]) -> Vec<String> {
    let mut names: Vec<String> = nodes
        .iter()
        .filter(|n| is_gateway(n))
        .map(|n| n.name_any())
        .collect();
    names.sort();
    names
}

/// Addon condition for the current gateway nodes
pub fn gateway_condition(gateways: &[String]) -> Condition {
    if gateways.is_empty() {
        Condition::falsy(
            CONDITION_GATEWAY_NODES_LABELED,
            REASON_GATEWAY_NODES_UNLABELED,
            format!("There are no nodes with label {GATEWAY_LABEL}=true"),
        )
    } else {
        Condition::truthy(
            CONDITION_GATEWAY_NODES_LABELED,
            REASON_GATEWAY_NODES_LABELED,
            format!("The nodes {:?} are labeled as gateways", gateways),
        )
    }
}

/// Report whether any node is a gateway
#[instrument(skip(addon, ctx), fields(cluster = %ctx.cluster_name, addon = %addon.name_any()))]
pub async fn reconcile(addon: Arc<ManagedClusterAddOn>, ctx: Arc<SpokeContext>) -> Result<Action, Error> {
    let timer = ReconcileTimer::start(CONTROLLER);

    let result = async {
        let nodes = ctx.nodes.list_nodes().await?;
        let gateways = gateway_nodes(&nodes);
        debug!(count = gateways.len(), "Gateway nodes");
        set_addon_conditions(ctx.addons.as_ref(), vec![gateway_condition(&gateways)]).await?;
        Ok(Action::requeue(Duration::from_secs(300)))
    }
    .await;

    if result.is_ok() {
        ctx.backoff
            .on_success(&SpokeContext::backoff_key(CONTROLLER, &addon.name_any()));
    }
    timer.observe(result)
}

/// Requeue with backoff
pub fn error_policy(addon: Arc<ManagedClusterAddOn>, error: &Error, ctx: Arc<SpokeContext>) -> Action {
    ctx.backoff
        .on_error(&SpokeContext::backoff_key(CONTROLLER, &addon.name_any()), error)
}
