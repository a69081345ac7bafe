//! Submariner agent controller
//!
//! Keyed by ManagedCluster. For every cluster in a cluster set with the
//! `submariner` addon enabled it deploys the per-cluster broker RBAC,
//! prepares the cloud environment described by the cluster's
//! SubmarinerConfig and delivers the operator and the Submariner CR through
//! ManifestWorks. Clusters that leave their set, drop the addon or are
//! deleted are cleaned up again.

mod client;
mod cluster_info;
mod works;

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use submariner_addon_cloud::{
    CloudPrepare, GatewayDeployer, Platform, Provider, ProviderInfo, ProviderRegistry,
};
use submariner_addon_common::conditions::find_condition;
use submariner_addon_common::controller::ReconcileBackoff;
use submariner_addon_common::crd::{
    Condition, ConditionStatus, ManagedCluster, ManagedClusterInfo, SubmarinerConfig,
    SubmarinerConfigSpec, SubmarinerConfigStatus, ADDON_NAME, CONDITION_CONFIG_APPLIED,
    CONDITION_ENV_PREPARED, CONFIG_FINALIZER, REASON_CONFIG_APPLIED, REASON_CONFIG_APPLY_FAILED,
    REASON_ENV_PREPARATION_FAILED, REASON_ENV_PREPARED, SUBMARINER_CONFIG_NAME,
};
use submariner_addon_common::events::{object_ref, EventPublisher};
use submariner_addon_common::finalizer::{
    add_finalizer, has_finalizer, is_being_deleted, remove_finalizer,
};
use submariner_addon_common::manifests::ManifestApplier;
use submariner_addon_common::metrics::{record_manifest_writes, ReconcileTimer};
use submariner_addon_common::status::{
    update_condition_fn, update_status, ResourceClient, UpdateStatusFn,
};
use submariner_addon_common::work::{
    apply_manifest_work, ManifestWorkClient, OPERATOR_WORK_NAME, RESOURCE_WORK_NAME,
};
use submariner_addon_common::{broker_namespace, Error};
use tracing::{debug, info, instrument, warn};

use crate::assets::{
    AgentManifestConfig, BrokerInfo, ClusterRbacConfig, CLUSTER_AGENT_RBAC, CLUSTER_BROKER_RBAC,
};
use crate::secrets::{ensure_cluster_token, read_cluster_token, read_ipsec_psk, SecretClient};

pub use client::{ClusterNamespaceClients, KubeClusterNamespaceClients};
pub use cluster_info::managed_cluster_info;
pub use works::{operator_work, resource_work};

/// Finalizer held on ManagedClusters while Submariner is deployed to them
pub const CLUSTER_AGENT_FINALIZER: &str =
    "cluster.open-cluster-management.io/submariner-agent-cleanup";

/// Periodic resync
const RESYNC: Duration = Duration::from_secs(600);

/// Requeue while the broker token or PSK is being populated
const BROKER_NOT_READY_REQUEUE: Duration = Duration::from_secs(10);

/// Per-cluster RBAC, in apply order
const CLUSTER_RBAC_FILES: [&str; 2] = [CLUSTER_BROKER_RBAC, CLUSTER_AGENT_RBAC];

/// Controller-wide settings from the command line
#[derive(Clone, Debug)]
pub struct AgentSettings {
    /// Hub API server URL handed to the spoke as the broker endpoint
    pub broker_api_server: String,
    /// Addon agent image; no agent is deployed when unset
    pub agent_image: Option<String>,
    /// Operator install namespace on managed clusters
    pub install_namespace: String,
}

/// Shared state of the agent controller
pub struct AgentContext {
    /// ManagedCluster access for finalizers
    pub clusters: Arc<dyn ResourceClient<ManagedCluster>>,
    /// Clients scoped to cluster namespaces
    pub namespaces: Arc<dyn ClusterNamespaceClients>,
    /// Hub secrets
    pub secrets: Arc<dyn SecretClient>,
    /// ManifestWorks
    pub works: Arc<dyn ManifestWorkClient>,
    /// Per-cluster RBAC applier; its renderer also builds ManifestWorks
    pub applier: ManifestApplier,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Cloud providers by platform
    pub providers: ProviderRegistry,
    /// Firewall backend handed to providers
    pub cloud: Arc<dyn CloudPrepare>,
    /// Gateway backend handed to providers
    pub gateways: Arc<dyn GatewayDeployer>,
    /// Command-line settings
    pub settings: AgentSettings,
    /// Requeue backoff
    pub backoff: ReconcileBackoff,
}

/// Reconcile Submariner onto a managed cluster
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<ManagedCluster>, ctx: Arc<AgentContext>) -> Result<Action, Error> {
    let timer = ReconcileTimer::start("submariner-agent");
    let result = reconcile_inner(&cluster, &ctx).await;
    if result.is_ok() {
        ctx.backoff.on_success(&cluster.name_any());
    }
    timer.observe(result)
}

/// Requeue with per-cluster backoff
pub fn error_policy(cluster: Arc<ManagedCluster>, error: &Error, ctx: Arc<AgentContext>) -> Action {
    ctx.backoff.on_error(&cluster.name_any(), error)
}

async fn reconcile_inner(cluster: &ManagedCluster, ctx: &AgentContext) -> Result<Action, Error> {
    let name = cluster.name_any();
    let addon = ctx.namespaces.addons(&name).get_opt(ADDON_NAME).await?;
    let addon_enabled = addon.as_ref().is_some_and(|a| !is_being_deleted(a));

    let cluster_set = cluster
        .cluster_set()
        .filter(|_| addon_enabled && !is_being_deleted(cluster));
    let Some(cluster_set) = cluster_set else {
        if has_finalizer(cluster, CLUSTER_AGENT_FINALIZER) {
            info!(addon_enabled, "Removing Submariner from cluster");
            cleanup(cluster, ctx).await?;
        }
        return Ok(Action::await_change());
    };

    add_finalizer(ctx.clusters.as_ref(), cluster, CLUSTER_AGENT_FINALIZER).await?;

    let broker_ns = broker_namespace(cluster_set);
    let rbac = ClusterRbacConfig {
        cluster_name: name.clone(),
        broker_namespace: broker_ns.clone(),
    };
    let summary = ctx
        .applier
        .apply_manifests(&object_ref(cluster), &CLUSTER_RBAC_FILES, &rbac)
        .await?;
    record_manifest_writes(summary.created, summary.updated);
    ensure_cluster_token(ctx.secrets.as_ref(), &broker_ns, &name).await?;

    let configs = ctx.namespaces.configs(&name);
    let config = configs.get_opt(SUBMARINER_CONFIG_NAME).await?;
    let mut errors = Vec::new();
    let spec = match &config {
        Some(config) if is_being_deleted(config) => {
            if let Err(e) = release_config(cluster, config, configs.as_ref(), ctx).await {
                errors.push(e);
            }
            SubmarinerConfigSpec::default()
        }
        Some(config) => {
            if let Err(e) = sync_config(cluster, config, configs.as_ref(), ctx).await {
                warn!(error = %e, "Failed to sync SubmarinerConfig");
                errors.push(e);
            }
            config.spec.clone()
        }
        None => SubmarinerConfigSpec::default(),
    };

    let Some(broker) = broker_info(ctx, &broker_ns, &name).await? else {
        Error::from_errors(errors)?;
        info!(broker_namespace = %broker_ns, "Broker token or IPsec PSK not ready yet");
        return Ok(Action::requeue(BROKER_NOT_READY_REQUEUE));
    };

    let manifest_config = AgentManifestConfig::new(
        &name,
        cluster.is_openshift(),
        &broker,
        &spec,
        &ctx.settings.install_namespace,
        ctx.settings.agent_image.as_deref(),
    );
    let applied = deploy_works(cluster, &manifest_config, ctx).await;

    if let Some(config) = config.as_ref().filter(|c| !is_being_deleted(*c)) {
        let mut condition = match &applied {
            Ok(()) => Condition::truthy(
                CONDITION_CONFIG_APPLIED,
                REASON_CONFIG_APPLIED,
                "Submariner manifests are applied",
            ),
            Err(e) => Condition::falsy(
                CONDITION_CONFIG_APPLIED,
                REASON_CONFIG_APPLY_FAILED,
                e.to_string(),
            ),
        };
        condition.observed_generation = config.metadata.generation;
        if let Err(e) = update_status(
            configs.as_ref(),
            SUBMARINER_CONFIG_NAME,
            &[update_condition_fn(condition)],
        )
        .await
        {
            errors.push(e);
        }
    }

    if let Err(e) = applied {
        errors.push(e);
    }
    Error::from_errors(errors)?;
    Ok(Action::requeue(RESYNC))
}

async fn deploy_works(
    cluster: &ManagedCluster,
    config: &AgentManifestConfig,
    ctx: &AgentContext,
) -> Result<(), Error> {
    let namespace = cluster.name_any();
    let renderer = ctx.applier.renderer();
    let regarding = object_ref(cluster);

    for work in [
        operator_work(renderer, &namespace, config)?,
        resource_work(renderer, &namespace, config)?,
    ] {
        let outcome =
            apply_manifest_work(ctx.works.as_ref(), ctx.events.as_ref(), &regarding, work).await?;
        debug!(?outcome, "ManifestWork applied");
    }
    Ok(())
}

async fn broker_info(
    ctx: &AgentContext,
    broker_ns: &str,
    cluster: &str,
) -> Result<Option<BrokerInfo>, Error> {
    let Some((token, ca)) = read_cluster_token(ctx.secrets.as_ref(), broker_ns, cluster).await?
    else {
        return Ok(None);
    };
    let Some(psk) = read_ipsec_psk(ctx.secrets.as_ref(), broker_ns).await? else {
        return Ok(None);
    };
    Ok(Some(BrokerInfo {
        namespace: broker_ns.to_string(),
        api_server: ctx.settings.broker_api_server.clone(),
        token,
        ca,
        psk,
    }))
}

/// Record cluster facts and prepare the cloud once per config generation
async fn sync_config(
    cluster: &ManagedCluster,
    config: &SubmarinerConfig,
    configs: &dyn ResourceClient<SubmarinerConfig>,
    ctx: &AgentContext,
) -> Result<(), Error> {
    add_finalizer(configs, config, CONFIG_FINALIZER).await?;

    let info = current_cluster_info(cluster, config);
    let recorded = info.clone();
    let record_info: UpdateStatusFn<SubmarinerConfigStatus> =
        Box::new(move |status: &mut SubmarinerConfigStatus| {
            status.managed_cluster_info = recorded.clone();
        });
    update_status(configs, SUBMARINER_CONFIG_NAME, &[record_info]).await?;

    if env_prepared(config) {
        return Ok(());
    }

    let prepared = match cloud_provider(cluster, config, &info, ctx).await {
        Ok(None) => return Ok(()),
        Ok(Some(provider)) => provider.prepare_submariner_cluster_env().await,
        Err(e) => Err(e),
    };

    let mut condition = match &prepared {
        Ok(()) => Condition::truthy(
            CONDITION_ENV_PREPARED,
            REASON_ENV_PREPARED,
            "Submariner cluster environment is prepared",
        ),
        Err(e) => Condition::falsy(
            CONDITION_ENV_PREPARED,
            REASON_ENV_PREPARATION_FAILED,
            e.to_string(),
        ),
    };
    condition.observed_generation = config.metadata.generation;
    update_status(configs, SUBMARINER_CONFIG_NAME, &[update_condition_fn(condition)]).await?;
    prepared
}

/// Undo cloud preparation and let a deleted config go
async fn release_config(
    cluster: &ManagedCluster,
    config: &SubmarinerConfig,
    configs: &dyn ResourceClient<SubmarinerConfig>,
    ctx: &AgentContext,
) -> Result<(), Error> {
    if !has_finalizer(config, CONFIG_FINALIZER) {
        return Ok(());
    }

    let info = current_cluster_info(cluster, config);
    if let Some(provider) = cloud_provider(cluster, config, &info, ctx).await? {
        provider.cleanup_submariner_cluster_env().await?;
    }
    remove_finalizer(configs, config, CONFIG_FINALIZER).await?;
    Ok(())
}

fn current_cluster_info(cluster: &ManagedCluster, config: &SubmarinerConfig) -> ManagedClusterInfo {
    let recorded = config
        .status
        .as_ref()
        .map(|s| s.managed_cluster_info.clone())
        .unwrap_or_default();
    managed_cluster_info(cluster, &recorded)
}

fn env_prepared(config: &SubmarinerConfig) -> bool {
    config
        .status
        .as_ref()
        .and_then(|s| find_condition(&s.conditions, CONDITION_ENV_PREPARED))
        .is_some_and(|c| {
            c.status == ConditionStatus::True
                && c.observed_generation == config.metadata.generation
        })
}

/// Provider for the cluster's platform, when it has one and credentials are configured
async fn cloud_provider(
    cluster: &ManagedCluster,
    config: &SubmarinerConfig,
    info: &ManagedClusterInfo,
    ctx: &AgentContext,
) -> Result<Option<Box<dyn Provider>>, Error> {
    let Some(secret_ref) = config
        .spec
        .credentials_secret
        .as_ref()
        .filter(|s| !s.name.is_empty())
    else {
        return Ok(None);
    };
    let Some(platform) = Platform::from_cluster_info(info).filter(|p| ctx.providers.supports(*p))
    else {
        debug!(platform = %info.platform, "No cloud preparation for platform");
        return Ok(None);
    };

    let namespace = cluster.name_any();
    let credentials = ctx
        .secrets
        .get(&namespace, &secret_ref.name)
        .await?
        .ok_or_else(|| {
            Error::validation_for_field(
                format!("{namespace}/{SUBMARINER_CONFIG_NAME}"),
                "spec.credentialsSecret",
                format!("secret {} not found", secret_ref.name),
            )
        })?;

    ctx.providers.get(ProviderInfo {
        cluster_name: namespace,
        platform,
        config: config.spec.clone(),
        cluster_info: info.clone(),
        credentials,
        events: ctx.events.clone(),
        regarding: object_ref(config),
        cloud: ctx.cloud.clone(),
        gateways: ctx.gateways.clone(),
    })
}

/// Remove everything the controller created for `cluster`, then its finalizer
async fn cleanup(cluster: &ManagedCluster, ctx: &AgentContext) -> Result<(), Error> {
    let name = cluster.name_any();
    let mut errors = Vec::new();

    let configs = ctx.namespaces.configs(&name);
    if let Some(config) = configs.get_opt(SUBMARINER_CONFIG_NAME).await? {
        if let Err(e) = release_config(cluster, &config, configs.as_ref(), ctx).await {
            warn!(error = %e, "Failed to clean up cloud environment");
            errors.push(e);
        }
    }

    for work in [OPERATOR_WORK_NAME, RESOURCE_WORK_NAME] {
        if let Err(e) = ctx.works.delete(&name, work).await {
            errors.push(e);
        }
    }

    // Broker-side RBAC is only reachable while the set is still known
    let (files, broker_ns) = match cluster.cluster_set() {
        Some(set) => (vec![CLUSTER_AGENT_RBAC, CLUSTER_BROKER_RBAC], broker_namespace(set)),
        None => (vec![CLUSTER_AGENT_RBAC], String::new()),
    };
    let rbac = ClusterRbacConfig {
        cluster_name: name.clone(),
        broker_namespace: broker_ns,
    };
    if let Err(e) = ctx
        .applier
        .delete_from_manifests(&object_ref(cluster), &files, &rbac)
        .await
    {
        errors.push(e);
    }

    Error::from_errors(errors)?;
    remove_finalizer(ctx.clusters.as_ref(), cluster, CLUSTER_AGENT_FINALIZER).await?;
    info!("Submariner removed from cluster");
    Ok(())
}
