//! Controller runner - builds controller futures for each role
//!
//! Each `build_*` function returns a Vec of boxed futures that the caller
//! joins under leader election.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::Node;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};

use submariner_addon_cloud::{MachineSetDeployer, ProviderRegistry, ReportingCloudApi};
use submariner_addon_common::controller::{log_reconcile_result, ReconcileBackoff, WATCH_TIMEOUT_SECS};
use submariner_addon_common::crd::{
    ClusterManager, ManagedCluster, ManagedClusterAddOn, ManagedClusterSet, ManifestWork,
    RouteAgent, Submariner, SubmarinerConfig, SubmarinerDiagnoseConfig, Subscription, ADDON_NAME,
};
use submariner_addon_common::events::{EventPublisher, KubeEventPublisher};
use submariner_addon_common::manifests::{KubeManifestClient, ManifestApplier};
use submariner_addon_common::work::{KubeManifestWorkClient, ManifestWorkClient, WORK_ADDON_LABEL};
use submariner_addon_hub::agent::KubeClusterNamespaceClients;
use submariner_addon_hub::{
    agent, assets, broker, broker_crds, AgentContext, AgentSettings, BrokerContext,
    BrokerCrdsContext, KubeSecretClient,
};
use submariner_addon_spoke::{
    config, connections, deployment, diagnose, gateways, KubeClusterInspector, KubeNodeClient,
    SpokeContext,
};

/// A controller future ready to be joined
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Maps an object in a cluster namespace to the ManagedCluster of that name
fn cluster_of<K: ResourceExt>(obj: K) -> Option<ObjectRef<ManagedCluster>> {
    obj.namespace().map(|ns| ObjectRef::new(&ns))
}

/// Maps every object of a secondary watch onto the one addon key
fn to_addon<K: 'static>(
    key: ObjectRef<ManagedClusterAddOn>,
) -> impl Fn(K) -> Option<ObjectRef<ManagedClusterAddOn>> + Send + Sync + 'static {
    move |_| Some(key.clone())
}

/// Build the hub controller futures: broker, broker CRDs and per-cluster agent
pub fn build_hub_controllers(client: Client, settings: AgentSettings) -> Vec<ControllerFuture> {
    let events: Arc<dyn EventPublisher> =
        Arc::new(KubeEventPublisher::new(client.clone(), "submariner-addon-controller"));
    let applier = ManifestApplier::new(
        Arc::new(KubeManifestClient::new(client.clone())),
        events.clone(),
        Arc::new(assets::renderer()),
    );
    let secrets = Arc::new(KubeSecretClient::new(client.clone()));

    let sets: Api<ManagedClusterSet> = Api::all(client.clone());
    let broker_ctx = Arc::new(BrokerContext::new(
        Arc::new(sets.clone()),
        secrets.clone(),
        applier.clone(),
    ));

    let managers: Api<ClusterManager> = Api::all(client.clone());
    let crds_ctx = Arc::new(BrokerCrdsContext::new(
        Arc::new(managers.clone()),
        applier.clone(),
    ));

    let works: Arc<dyn ManifestWorkClient> = Arc::new(KubeManifestWorkClient::new(client.clone()));
    let clusters: Api<ManagedCluster> = Api::all(client.clone());
    let agent_ctx = Arc::new(AgentContext {
        clusters: Arc::new(clusters.clone()),
        namespaces: Arc::new(KubeClusterNamespaceClients::new(client.clone())),
        secrets,
        works: works.clone(),
        applier,
        events: events.clone(),
        providers: ProviderRegistry::with_defaults(),
        cloud: Arc::new(ReportingCloudApi::new()),
        gateways: Arc::new(MachineSetDeployer::new(works, events)),
        settings,
        backoff: ReconcileBackoff::new(),
    });

    tracing::info!("- Broker controller");
    let broker_ctrl = Controller::new(sets, watcher_config())
        .shutdown_on_signal()
        .run(broker::reconcile, broker::error_policy, broker_ctx)
        .for_each(log_reconcile_result("Broker"));

    tracing::info!("- Broker CRDs controller");
    let crds_ctrl = Controller::new(managers, watcher_config())
        .shutdown_on_signal()
        .run(broker_crds::reconcile, broker_crds::error_policy, crds_ctx)
        .for_each(log_reconcile_result("BrokerCrds"));

    tracing::info!("- Agent controller");
    let addons: Api<ManagedClusterAddOn> = Api::all(client.clone());
    let manifest_works: Api<ManifestWork> = Api::all(client.clone());
    let configs: Api<SubmarinerConfig> = Api::all(client);
    let agent_ctrl = Controller::new(clusters, watcher_config())
        .watches(addons, watcher_config(), |addon| {
            if addon.name_any() != ADDON_NAME {
                return None;
            }
            cluster_of(addon)
        })
        .watches(
            manifest_works,
            watcher_config().labels(&format!("{WORK_ADDON_LABEL}={ADDON_NAME}")),
            cluster_of,
        )
        .watches(configs, watcher_config(), cluster_of)
        .shutdown_on_signal()
        .run(agent::reconcile, agent::error_policy, agent_ctx)
        .for_each(log_reconcile_result("Agent"));

    vec![
        Box::pin(broker_ctrl),
        Box::pin(crds_ctrl),
        Box::pin(agent_ctrl),
    ]
}

/// Build the spoke agent controller futures
///
/// `hub` reaches the cluster namespace on the hub, `spoke` the managed
/// cluster itself.
pub fn build_spoke_controllers(
    hub: Client,
    spoke: Client,
    cluster_name: &str,
    install_namespace: &str,
) -> Vec<ControllerFuture> {
    let addons: Api<ManagedClusterAddOn> = Api::namespaced(hub.clone(), cluster_name);
    let configs: Api<SubmarinerConfig> = Api::namespaced(hub.clone(), cluster_name);
    let diagnoses: Api<SubmarinerDiagnoseConfig> = Api::namespaced(hub.clone(), cluster_name);

    let ctx = Arc::new(SpokeContext {
        cluster_name: cluster_name.to_string(),
        addons: Arc::new(addons.clone()),
        configs: Arc::new(configs.clone()),
        diagnoses: Arc::new(diagnoses.clone()),
        nodes: Arc::new(KubeNodeClient::new(spoke.clone())),
        inspector: Arc::new(KubeClusterInspector::new(spoke.clone(), install_namespace)),
        events: Arc::new(KubeEventPublisher::new(hub, "submariner-addon-agent")),
        backoff: ReconcileBackoff::new(),
    });

    tracing::info!(cluster = %cluster_name, "- SubmarinerConfig controller");
    let config_ctrl = Controller::new(configs, watcher_config())
        .shutdown_on_signal()
        .run(config::reconcile, config::error_policy, ctx.clone())
        .for_each(log_reconcile_result("SubmarinerConfig"));

    // Status controllers key on the hub addon, which outlives every spoke object
    let addon_key = ObjectRef::<ManagedClusterAddOn>::new(ADDON_NAME).within(cluster_name);
    let addon_watch = || watcher_config().fields(&format!("metadata.name={ADDON_NAME}"));

    tracing::info!("- Gateway nodes controller");
    let nodes: Api<Node> = Api::all(spoke.clone());
    let gateways_ctrl = Controller::new(addons.clone(), addon_watch())
        .watches(nodes, watcher_config(), to_addon(addon_key.clone()))
        .shutdown_on_signal()
        .run(gateways::reconcile, gateways::error_policy, ctx.clone())
        .for_each(log_reconcile_result("GatewayNodes"));

    tracing::info!("- Connections controller");
    let submariners: Api<Submariner> = Api::namespaced(spoke.clone(), install_namespace);
    let route_agents: Api<RouteAgent> = Api::namespaced(spoke.clone(), install_namespace);
    let connections_ctrl = Controller::new(addons.clone(), addon_watch())
        .watches(submariners, watcher_config(), to_addon(addon_key.clone()))
        .watches(route_agents, watcher_config(), to_addon(addon_key.clone()))
        .shutdown_on_signal()
        .run(connections::reconcile, connections::error_policy, ctx.clone())
        .for_each(log_reconcile_result("Connections"));

    tracing::info!("- Deployment controller");
    let subscriptions: Api<Subscription> = Api::namespaced(spoke.clone(), install_namespace);
    let deployments: Api<Deployment> = Api::namespaced(spoke.clone(), install_namespace);
    let daemon_sets: Api<DaemonSet> = Api::namespaced(spoke, install_namespace);
    let deployment_ctrl = Controller::new(addons, addon_watch())
        .watches(subscriptions, watcher_config(), to_addon(addon_key.clone()))
        .watches(deployments, watcher_config(), to_addon(addon_key.clone()))
        .watches(daemon_sets, watcher_config(), to_addon(addon_key))
        .shutdown_on_signal()
        .run(deployment::reconcile, deployment::error_policy, ctx.clone())
        .for_each(log_reconcile_result("Deployment"));

    tracing::info!("- Diagnose controller");
    let diagnose_ctrl = Controller::new(diagnoses, watcher_config())
        .shutdown_on_signal()
        .run(diagnose::reconcile, diagnose::error_policy, ctx)
        .for_each(log_reconcile_result("Diagnose"));

    vec![
        Box::pin(config_ctrl),
        Box::pin(gateways_ctrl),
        Box::pin(connections_ctrl),
        Box::pin(deployment_ctrl),
        Box::pin(diagnose_ctrl),
    ]
}
