//! Conditions the spoke reports on the `submariner` ManagedClusterAddOn

use submariner_addon_common::crd::{
    Condition, ManagedClusterAddOn, ManagedClusterAddOnStatus, ADDON_NAME,
};
use submariner_addon_common::status::{
    update_condition_fn, update_status, ResourceClient, UpdateStatusFn,
};
use submariner_addon_common::Error;
use tracing::debug;

/// Gateway nodes are labelled
pub use submariner_addon_common::crd::CONDITION_GATEWAY_NODES_LABELED;
/// Reason: at least one gateway node exists
pub use submariner_addon_common::crd::REASON_GATEWAY_NODES_LABELED;
/// Reason: no node carries the gateway label
pub const REASON_GATEWAY_NODES_UNLABELED: &str = "SubmarinerGatewayNodesUnlabeled";

/// Gateway connections degraded
pub const CONDITION_CONNECTION_DEGRADED: &str = "SubmarinerConnectionDegraded";
/// Route agent paths degraded
pub const CONDITION_ROUTE_AGENT_CONNECTION_DEGRADED: &str = "RouteAgentConnectionDegraded";
/// Reason: every connection is up
pub const REASON_CONNECTIONS_ESTABLISHED: &str = "ConnectionsEstablished";
/// Reason: some connections are down
pub const REASON_CONNECTIONS_DEGRADED: &str = "ConnectionsDegraded";
/// Reason: no gateway is active
pub const REASON_NO_ACTIVE_GATEWAY: &str = "NoActiveGateway";

/// Submariner components degraded
pub const CONDITION_AGENT_DEGRADED: &str = "SubmarinerAgentDegraded";
/// Reason: every component is healthy
pub const REASON_AGENT_DEPLOYED: &str = "SubmarinerAgentDeployed";
/// Reason: the operator Subscription is missing
pub const REASON_SUBSCRIPTION_NOT_FOUND: &str = "SubscriptionNotFound";
/// Reason: OLM has not installed the operator CSV
pub const REASON_CSV_NOT_INSTALLED: &str = "CSVNotInstalled";
/// Reason: the operator Deployment is missing or unavailable
pub const REASON_OPERATOR_NOT_DEPLOYED: &str = "OperatorNotDeployed";
/// Reason: the gateway DaemonSet is missing
pub const REASON_GATEWAYS_NOT_DEPLOYED: &str = "GatewaysNotDeployed";
/// Reason: gateway pods are unavailable
pub const REASON_GATEWAYS_DEGRADED: &str = "GatewaysDegraded";
/// Reason: the route agent DaemonSet is missing
pub const REASON_ROUTE_AGENTS_NOT_DEPLOYED: &str = "RouteAgentsNotDeployed";
/// Reason: route agent pods are unavailable
pub const REASON_ROUTE_AGENTS_DEGRADED: &str = "RouteAgentsDegraded";
/// Reason: globalnet pods are unavailable
pub const REASON_GLOBALNET_DEGRADED: &str = "GlobalnetDegraded";
/// Reason: lighthouse is missing or unavailable
pub const REASON_SERVICE_DISCOVERY_DEGRADED: &str = "ServiceDiscoveryDegraded";

/// Merge `conditions` into the addon status. Returns whether a write happened.
pub async fn set_addon_conditions(
    addons: &dyn ResourceClient<ManagedClusterAddOn>,
    conditions: Vec<Condition>,
) -> Result<bool, Error> {
    let update_fns: Vec<UpdateStatusFn<ManagedClusterAddOnStatus>> =
        conditions.into_iter().map(update_condition_fn).collect();
    let (_, updated) = update_status(addons, ADDON_NAME, &update_fns).await?;
    if updated {
        debug!("Addon status updated");
    }
    Ok(updated)
}
