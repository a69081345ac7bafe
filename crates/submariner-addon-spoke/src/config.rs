//! Gateway node labelling for the cluster's SubmarinerConfig
//!
//! Clusters whose gateways are cloud instances prepared by the hub only get
//! a condition. Everywhere else the agent labels `gateways` worker nodes,
//! keeping nodes that are already gateways and spreading new ones across
//! zones, and removes the label from any surplus node.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Node;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use submariner_addon_cloud::Platform;
use submariner_addon_common::crd::{
    Condition, SubmarinerConfig, SubmarinerConfigStatus, CONDITION_GATEWAY_NODES_LABELED,
    REASON_GATEWAY_NODES_LABELED, REASON_GATEWAY_NODES_LABELING_FAILED,
    REASON_MANAGED_CLUSTER_ON_CLOUD, SUBMARINER_CONFIG_NAME,
};
use submariner_addon_common::events::{actions, object_ref, reasons};
use submariner_addon_common::finalizer::is_being_deleted;
use submariner_addon_common::metrics::ReconcileTimer;
use submariner_addon_common::status::{update_condition_fn, update_status, UpdateStatusFn};
use submariner_addon_common::Error;
use tracing::{debug, info, instrument, warn};

use crate::gateways::is_gateway;
use crate::SpokeContext;

const CONTROLLER: &str = "spoke-config";
const RESYNC: Duration = Duration::from_secs(600);

/// Label marking worker nodes
pub const WORKER_LABEL: &str = "node-role.kubernetes.io/worker";
/// Zone label of a node
pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";
const CONTROL_PLANE_LABELS: [&str; 2] = [
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

/// Label changes that bring the cluster to the wanted gateway count
#[derive(Debug, Default, PartialEq, Eq)]
pub struct GatewayPlan {
    /// Gateway nodes after the plan is applied
    pub selected: Vec<String>,
    /// Nodes to label
    pub label: Vec<String>,
    /// Nodes to unlabel
    pub unlabel: Vec<String>,
}

fn is_worker(node: &Node) -> bool {
    let labels = node.labels();
    labels.contains_key(WORKER_LABEL) && !CONTROL_PLANE_LABELS.iter().any(|l| labels.contains_key(*l))
}

fn zone(node: &Node) -> Option<&str> {
    node.labels().get(ZONE_LABEL).map(String::as_str)
}

/// Distinct zones of the worker nodes, sorted
pub fn worker_zones(nodes: &[Node]) -> Vec<String> {
    nodes
        .iter()
        .filter(|n| is_worker(n))
        .filter_map(zone)
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Choose `wanted` gateway nodes among the workers.
///
/// Existing gateways are kept first. New gateways go to zones without one
/// before doubling up on a zone.
pub fn plan_gateways(nodes: &[Node], wanted: usize) -> Result<GatewayPlan, Error> {
    let mut workers: Vec<&Node> = nodes.iter().filter(|n| is_worker(n)).collect();
    if workers.len() < wanted {
        return Err(Error::validation(format!(
            "{wanted} gateway nodes are required but only {} worker nodes are available",
            workers.len()
        )));
    }
    workers.sort_by_key(|n| (!is_gateway(n), n.name_any()));

    let mut selected: Vec<&Node> = Vec::with_capacity(wanted);
    let mut zones: BTreeSet<&str> = BTreeSet::new();
    for node in workers.iter().copied().filter(|n| is_gateway(n)).take(wanted) {
        zones.extend(zone(node));
        selected.push(node);
    }
    let fresh: Vec<&Node> = workers.iter().copied().filter(|n| !is_gateway(n)).collect();
    for &node in &fresh {
        if selected.len() == wanted {
            break;
        }
        if let Some(z) = zone(node) {
            if zones.insert(z) {
                selected.push(node);
            }
        }
    }
    for &node in &fresh {
        if selected.len() == wanted {
            break;
        }
        if !selected.iter().any(|s| s.name_any() == node.name_any()) {
            selected.push(node);
        }
    }

    let names: BTreeSet<String> = selected.iter().map(|n| n.name_any()).collect();
    let plan = GatewayPlan {
        label: selected
            .iter()
            .filter(|n| !is_gateway(n))
            .map(|n| n.name_any())
            .collect(),
        unlabel: nodes
            .iter()
            .filter(|n| is_gateway(n) && !names.contains(&n.name_any()))
            .map(|n| n.name_any())
            .collect(),
        selected: names.into_iter().collect(),
    };
    Ok(plan)
}

/// Gateways are dedicated instances the hub prepared on a cloud platform
fn is_on_cloud(config: &SubmarinerConfig) -> bool {
    config.spec.credentials_secret.is_some()
        && config
            .status
            .as_ref()
            .and_then(|s| Platform::from_cluster_info(&s.managed_cluster_info))
            .is_some()
}

async fn label_gateways(ctx: &SpokeContext, config: &SubmarinerConfig) -> Result<Vec<String>, Error> {
    let nodes = ctx.nodes.list_nodes().await?;
    let wanted = config.spec.gateway_config.gateways.max(1) as usize;
    let plan = plan_gateways(&nodes, wanted)?;
    let regarding = object_ref(config);

    for node in &plan.label {
        ctx.nodes.label_gateway(node).await?;
        info!(node = %node, "Labeled gateway node");
        ctx.events
            .publish(
                &regarding,
                EventType::Normal,
                reasons::GATEWAY_LABELED,
                actions::LABEL,
                Some(format!("Node {node} labeled as gateway")),
            )
            .await;
    }
    for node in &plan.unlabel {
        ctx.nodes.unlabel_gateway(node).await?;
        info!(node = %node, "Removed gateway label from surplus node");
        ctx.events
            .publish(
                &regarding,
                EventType::Normal,
                reasons::GATEWAY_UNLABELED,
                actions::LABEL,
                Some(format!("Node {node} is no longer a gateway")),
            )
            .await;
    }
    Ok(plan.selected)
}

async fn network_type(ctx: &SpokeContext) -> Option<String> {
    match ctx.inspector.submariner().await {
        Ok(submariner) => submariner
            .and_then(|s| s.status)
            .and_then(|s| s.network_plugin)
            .filter(|p| !p.is_empty()),
        Err(e) => {
            warn!(error = %e, "Cannot read the Submariner network plugin");
            None
        }
    }
}

/// Zones the hub places gateway instances in
async fn cloud_zones(ctx: &SpokeContext) -> Option<Vec<String>> {
    match ctx.nodes.list_nodes().await {
        Ok(nodes) => Some(worker_zones(&nodes)).filter(|z| !z.is_empty()),
        Err(e) => {
            warn!(error = %e, "Cannot list nodes for their zones");
            None
        }
    }
}

async fn sync(config: &SubmarinerConfig, ctx: &SpokeContext) -> Result<Action, Error> {
    let on_cloud = is_on_cloud(config);
    let (mut condition, labeling) = if on_cloud {
        debug!("Gateways are cloud instances, nothing to label");
        (
            Condition::truthy(
                CONDITION_GATEWAY_NODES_LABELED,
                REASON_MANAGED_CLUSTER_ON_CLOUD,
                "The managed cluster is on a cloud platform, gateway instances are prepared by the hub",
            ),
            Ok(()),
        )
    } else {
        match label_gateways(ctx, config).await {
            Ok(selected) => (
                Condition::truthy(
                    CONDITION_GATEWAY_NODES_LABELED,
                    REASON_GATEWAY_NODES_LABELED,
                    format!("The nodes {:?} are labeled as gateways", selected),
                ),
                Ok(()),
            ),
            Err(e) => (
                Condition::falsy(
                    CONDITION_GATEWAY_NODES_LABELED,
                    REASON_GATEWAY_NODES_LABELING_FAILED,
                    format!("Failed to label the gateway nodes: {e}"),
                ),
                Err(e),
            ),
        }
    };
    condition.observed_generation = config.metadata.generation;

    let mut update_fns: Vec<UpdateStatusFn<SubmarinerConfigStatus>> =
        vec![update_condition_fn(condition)];
    if let Some(network_type) = network_type(ctx).await {
        update_fns.push(Box::new(move |status: &mut SubmarinerConfigStatus| {
            status.managed_cluster_info.network_type = network_type.clone();
        }));
    }
    if on_cloud {
        if let Some(zones) = cloud_zones(ctx).await {
            update_fns.push(Box::new(move |status: &mut SubmarinerConfigStatus| {
                status.managed_cluster_info.zones = zones.clone();
            }));
        }
    }
    update_status(ctx.configs.as_ref(), &config.name_any(), &update_fns).await?;

    labeling?;
    Ok(Action::requeue(RESYNC))
}

/// Label gateway nodes and record the outcome on the config
#[instrument(skip(config, ctx), fields(cluster = %ctx.cluster_name, config = %config.name_any()))]
pub async fn reconcile(config: Arc<SubmarinerConfig>, ctx: Arc<SpokeContext>) -> Result<Action, Error> {
    if config.name_any() != SUBMARINER_CONFIG_NAME {
        debug!("Ignoring SubmarinerConfig with a foreign name");
        return Ok(Action::await_change());
    }
    if is_being_deleted(config.as_ref()) {
        return Ok(Action::await_change());
    }

    let timer = ReconcileTimer::start(CONTROLLER);
    let result = sync(&config, &ctx).await;
    if result.is_ok() {
        ctx.backoff
            .on_success(&SpokeContext::backoff_key(CONTROLLER, &config.name_any()));
    }
    timer.observe(result)
}

/// Requeue with backoff
pub fn error_policy(config: Arc<SubmarinerConfig>, error: &Error, ctx: Arc<SpokeContext>) -> Action {
    ctx.backoff
        .on_error(&SpokeContext::backoff_key(CONTROLLER, &config.name_any()), error)
}
