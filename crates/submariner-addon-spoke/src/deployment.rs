//! Deployment status controller
//!
//! Walks the Submariner install from the OLM subscription down to the
//! per-node DaemonSets and reports the first problem found, with every
//! problem listed in the message.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use submariner_addon_common::crd::{Condition, ManagedClusterAddOn, Submariner, Subscription};
use submariner_addon_common::metrics::ReconcileTimer;
use submariner_addon_common::Error;
use tracing::{debug, instrument};

use crate::addon::{
    set_addon_conditions, CONDITION_AGENT_DEGRADED, REASON_AGENT_DEPLOYED,
    REASON_CSV_NOT_INSTALLED, REASON_GATEWAYS_DEGRADED, REASON_GATEWAYS_NOT_DEPLOYED,
    REASON_GLOBALNET_DEGRADED, REASON_OPERATOR_NOT_DEPLOYED, REASON_ROUTE_AGENTS_DEGRADED,
    REASON_ROUTE_AGENTS_NOT_DEPLOYED, REASON_SERVICE_DISCOVERY_DEGRADED,
    REASON_SUBSCRIPTION_NOT_FOUND,
};
use crate::client::ClusterInspector;
use crate::SpokeContext;

const CONTROLLER: &str = "spoke-deployment";

/// Operator Deployment
pub const OPERATOR_DEPLOYMENT: &str = "submariner-operator";
/// Gateway DaemonSet
pub const GATEWAY_DAEMON_SET: &str = "submariner-gateway";
/// Route agent DaemonSet
pub const ROUTE_AGENT_DAEMON_SET: &str = "submariner-routeagent";
/// Globalnet DaemonSet
pub const GLOBALNET_DAEMON_SET: &str = "submariner-globalnet";
/// Lighthouse agent Deployment
pub const LIGHTHOUSE_AGENT_DEPLOYMENT: &str = "submariner-lighthouse-agent";
/// Lighthouse CoreDNS Deployment
pub const LIGHTHOUSE_COREDNS_DEPLOYMENT: &str = "submariner-lighthouse-coredns";

/// Objects the deployment check looks at
#[derive(Clone, Debug, Default)]
pub struct DeploymentSnapshot {
    /// Operator subscription
    pub subscription: Option<Subscription>,
    /// Submariner CR
    pub submariner: Option<Submariner>,
    /// Operator Deployment
    pub operator: Option<Deployment>,
    /// Gateway DaemonSet
    pub gateway: Option<DaemonSet>,
    /// Route agent DaemonSet
    pub route_agent: Option<DaemonSet>,
    /// Globalnet DaemonSet
    pub globalnet: Option<DaemonSet>,
    /// Lighthouse agent Deployment
    pub lighthouse_agent: Option<Deployment>,
    /// Lighthouse CoreDNS Deployment
    pub lighthouse_coredns: Option<Deployment>,
}

impl DeploymentSnapshot {
    /// Read everything from the cluster
    pub async fn load(inspector: &dyn ClusterInspector) -> Result<Self, Error> {
        Ok(Self {
            subscription: inspector.subscription().await?,
            submariner: inspector.submariner().await?,
            operator: inspector.deployment(OPERATOR_DEPLOYMENT).await?,
            gateway: inspector.daemon_set(GATEWAY_DAEMON_SET).await?,
            route_agent: inspector.daemon_set(ROUTE_AGENT_DAEMON_SET).await?,
            globalnet: inspector.daemon_set(GLOBALNET_DAEMON_SET).await?,
            lighthouse_agent: inspector.deployment(LIGHTHOUSE_AGENT_DEPLOYMENT).await?,
            lighthouse_coredns: inspector.deployment(LIGHTHOUSE_COREDNS_DEPLOYMENT).await?,
        })
    }

    fn globalnet_enabled(&self) -> bool {
        self.globalnet.is_some()
            || self
                .submariner
                .as_ref()
                .is_some_and(|s| s.spec.global_cidr.as_deref().is_some_and(|c| !c.is_empty()))
    }

    fn service_discovery_enabled(&self) -> bool {
        self.submariner
            .as_ref()
            .is_some_and(|s| s.spec.service_discovery_enabled)
    }
}

/// A component problem: reason plus description
pub type Problem = (&'static str, String);

fn unavailable_pods(ds: &DaemonSet) -> Option<String> {
    let status = ds.status.as_ref()?;
    let unavailable = status.number_unavailable.unwrap_or_default();
    (unavailable > 0).then(|| {
        format!(
            "{unavailable} of {} pods of {} are unavailable",
            status.desired_number_scheduled,
            ds.name_any()
        )
    })
}

fn is_available(deployment: &Deployment) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or_default()
        > 0
}

fn check_daemon_set(
    ds: Option<&DaemonSet>,
    name: &str,
    missing: &'static str,
    degraded: &'static str,
    problems: &mut Vec<Problem>,
) {
    match ds {
        None => problems.push((missing, format!("The {name} DaemonSet does not exist"))),
        Some(ds) => {
            if let Some(msg) = unavailable_pods(ds) {
                problems.push((degraded, msg));
            }
        }
    }
}

/// Every problem with the install, in dependency order
pub fn deployment_problems(snapshot: &DeploymentSnapshot) -> Vec<Problem> {
    let mut problems = Vec::new();

    match &snapshot.subscription {
        None => problems.push((
            REASON_SUBSCRIPTION_NOT_FOUND,
            "The submariner Subscription does not exist".to_string(),
        )),
        Some(sub) => {
            let installed = sub
                .status
                .as_ref()
                .and_then(|s| s.installed_csv.as_deref())
                .is_some_and(|csv| !csv.is_empty());
            if !installed {
                problems.push((
                    REASON_CSV_NOT_INSTALLED,
                    "The submariner operator CSV is not installed".to_string(),
                ));
            }
        }
    }

    if !snapshot.operator.as_ref().is_some_and(is_available) {
        problems.push((
            REASON_OPERATOR_NOT_DEPLOYED,
            format!("The {OPERATOR_DEPLOYMENT} Deployment is not available"),
        ));
    }

    check_daemon_set(
        snapshot.gateway.as_ref(),
        GATEWAY_DAEMON_SET,
        REASON_GATEWAYS_NOT_DEPLOYED,
        REASON_GATEWAYS_DEGRADED,
        &mut problems,
    );
    check_daemon_set(
        snapshot.route_agent.as_ref(),
        ROUTE_AGENT_DAEMON_SET,
        REASON_ROUTE_AGENTS_NOT_DEPLOYED,
        REASON_ROUTE_AGENTS_DEGRADED,
        &mut problems,
    );
    if snapshot.globalnet_enabled() {
        check_daemon_set(
            snapshot.globalnet.as_ref(),
            GLOBALNET_DAEMON_SET,
            REASON_GLOBALNET_DEGRADED,
            REASON_GLOBALNET_DEGRADED,
            &mut problems,
        );
    }

    if snapshot.service_discovery_enabled() {
        for (name, deployment) in [
            (LIGHTHOUSE_AGENT_DEPLOYMENT, &snapshot.lighthouse_agent),
            (LIGHTHOUSE_COREDNS_DEPLOYMENT, &snapshot.lighthouse_coredns),
        ] {
            if !deployment.as_ref().is_some_and(is_available) {
                problems.push((
                    REASON_SERVICE_DISCOVERY_DEGRADED,
                    format!("The {name} Deployment is not available"),
                ));
            }
        }
    }

    problems
}

/// `SubmarinerAgentDegraded` for a set of problems
pub fn deployment_condition(problems: &[Problem]) -> Condition {
    match problems.first() {
        None => Condition::falsy(
            CONDITION_AGENT_DEGRADED,
            REASON_AGENT_DEPLOYED,
            "Submariner is deployed",
        ),
        Some((reason, _)) => Condition::truthy(
            CONDITION_AGENT_DEGRADED,
            *reason,
            problems
                .iter()
                .map(|(_, msg)| msg.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        ),
    }
}

/// Report Submariner component health on the addon
///
/// Keyed on the addon rather than the Subscription, so a missing
/// Subscription is still reported.
#[instrument(skip(addon, ctx), fields(cluster = %ctx.cluster_name, addon = %addon.name_any()))]
pub async fn reconcile(addon: Arc<ManagedClusterAddOn>, ctx: Arc<SpokeContext>) -> Result<Action, Error> {
    let timer = ReconcileTimer::start(CONTROLLER);

    let result = async {
        let snapshot = DeploymentSnapshot::load(ctx.inspector.as_ref()).await?;
        let problems = deployment_problems(&snapshot);
        debug!(problems = problems.len(), "Deployment status");
        set_addon_conditions(ctx.addons.as_ref(), vec![deployment_condition(&problems)]).await?;
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
