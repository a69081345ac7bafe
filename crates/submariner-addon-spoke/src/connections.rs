//! Connection status controller
//!
//! Summarises the gateway cables reported in the Submariner CR and the
//! route agents' view of remote endpoints into two addon conditions.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use submariner_addon_common::crd::{
    Condition, ManagedClusterAddOn, RouteAgent, Submariner, CONNECTION_CONNECTED,
};
use submariner_addon_common::metrics::ReconcileTimer;
use submariner_addon_common::Error;
use tracing::{debug, instrument};

use crate::addon::{
    set_addon_conditions, CONDITION_CONNECTION_DEGRADED,
    CONDITION_ROUTE_AGENT_CONNECTION_DEGRADED, REASON_CONNECTIONS_DEGRADED,
    REASON_CONNECTIONS_ESTABLISHED, REASON_NO_ACTIVE_GATEWAY,
};
use crate::client::ClusterInspector;
use crate::SpokeContext;

const CONTROLLER: &str = "spoke-connections";
const ENDPOINT_NONE: &str = "none";

/// `SubmarinerConnectionDegraded` from the gateway statuses
pub fn connection_condition(submariner: Option<&Submariner>) -> Condition {
    let gateways = submariner
        .and_then(|s| s.status.as_ref())
        .map(|s| s.gateways.as_slice())
        .unwrap_or_default();
    let active: Vec<_> = gateways.iter().filter(|g| g.is_active()).collect();
    if active.is_empty() {
        return Condition::truthy(
            CONDITION_CONNECTION_DEGRADED,
            REASON_NO_ACTIVE_GATEWAY,
            "There are no active Submariner gateways",
        );
    }

    let failing: Vec<String> = active
        .iter()
        .flat_map(|g| g.connections.iter())
        .filter(|c| c.status != CONNECTION_CONNECTED)
        .map(|c| {
            format!(
                "Connection to cluster {} ({}) is {}: {}",
                c.endpoint.cluster_id, c.endpoint.hostname, c.status, c.status_message
            )
        })
        .collect();

    if failing.is_empty() {
        Condition::falsy(
            CONDITION_CONNECTION_DEGRADED,
            REASON_CONNECTIONS_ESTABLISHED,
            "All connections are established",
        )
    } else {
        Condition::truthy(
            CONDITION_CONNECTION_DEGRADED,
            REASON_CONNECTIONS_DEGRADED,
            failing.join("\n"),
        )
    }
}

/// `RouteAgentConnectionDegraded` from the route agents' remote endpoints
pub fn route_agent_condition(route_agents: &[RouteAgent]) -> Condition {
    let failing: Vec<String> = route_agents
        .iter()
        .flat_map(|ra| {
            let name = ra.name_any();
            ra.status
                .iter()
                .flat_map(|s| s.remote_endpoints.iter())
                .filter(|e| e.status != CONNECTION_CONNECTED && e.status != ENDPOINT_NONE)
                .map(move |e| {
                    format!(
                        "Route agent {} connection to cluster {} is {}: {}",
                        name, e.spec.cluster_id, e.status, e.status_message
                    )
                })
        })
        .collect();

    if failing.is_empty() {
        Condition::falsy(
            CONDITION_ROUTE_AGENT_CONNECTION_DEGRADED,
            REASON_CONNECTIONS_ESTABLISHED,
            "All route agent connections are established",
        )
    } else {
        Condition::truthy(
            CONDITION_ROUTE_AGENT_CONNECTION_DEGRADED,
            REASON_CONNECTIONS_DEGRADED,
            failing.join("\n"),
        )
    }
}

/// Both connection conditions for the current state of the cluster
pub async fn connection_conditions(inspector: &dyn ClusterInspector) -> Result<[Condition; 2], Error> {
    let submariner = inspector.submariner().await?;
    let route_agents = inspector.route_agents().await?;
    Ok([
        connection_condition(submariner.as_ref()),
        route_agent_condition(&route_agents),
    ])
}

/// Report connection health on the addon
#[instrument(skip(addon, ctx), fields(cluster = %ctx.cluster_name, addon = %addon.name_any()))]
pub async fn reconcile(addon: Arc<ManagedClusterAddOn>, ctx: Arc<SpokeContext>) -> Result<Action, Error> {
    let timer = ReconcileTimer::start(CONTROLLER);

    let result = async {
        let conditions = connection_conditions(ctx.inspector.as_ref()).await?;
        debug!(
            gateways = %conditions[0].reason,
            route_agents = %conditions[1].reason,
            "Connection status"
        );
        set_addon_conditions(ctx.addons.as_ref(), conditions.into()).await?;
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
