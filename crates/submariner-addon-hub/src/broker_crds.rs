//! Broker CRDs controller
//!
//! Installs the CRDs member clusters sync through the broker while the
//! ClusterManager exists, and removes them with it.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use submariner_addon_common::controller::ReconcileBackoff;
use submariner_addon_common::crd::ClusterManager;
use submariner_addon_common::events::object_ref;
use submariner_addon_common::finalizer::{add_finalizer, is_being_deleted, remove_finalizer};
use submariner_addon_common::manifests::ManifestApplier;
use submariner_addon_common::metrics::{record_manifest_writes, ReconcileTimer};
use submariner_addon_common::status::ResourceClient;
use submariner_addon_common::Error;
use tracing::{info, instrument};

use crate::assets::BROKER_CRDS;

/// Finalizer held on the ClusterManager until the broker CRDs are removed
pub const CRDS_FINALIZER: &str = "cluster.open-cluster-management.io/submariner-crds-cleanup";

/// Shared state of the broker-CRDs controller
pub struct BrokerCrdsContext {
    /// ClusterManager access for finalizers
    pub managers: Arc<dyn ResourceClient<ClusterManager>>,
    /// CRD applier
    pub applier: ManifestApplier,
    /// Requeue backoff
    pub backoff: ReconcileBackoff,
}

impl BrokerCrdsContext {
    /// Create a context
    pub fn new(managers: Arc<dyn ResourceClient<ClusterManager>>, applier: ManifestApplier) -> Self {
        Self {
            managers,
            applier,
            backoff: ReconcileBackoff::new(),
        }
    }
}

/// Reconcile the broker CRDs against a ClusterManager
#[instrument(skip(manager, ctx), fields(cluster_manager = %manager.name_any()))]
pub async fn reconcile(
    manager: Arc<ClusterManager>,
    ctx: Arc<BrokerCrdsContext>,
) -> Result<Action, Error> {
    let timer = ReconcileTimer::start("broker-crds");
    let regarding = object_ref(manager.as_ref());

    let result = async {
        if is_being_deleted(manager.as_ref()) {
            info!("ClusterManager deleted, removing broker CRDs");
            ctx.applier
                .delete_from_manifests(&regarding, &BROKER_CRDS, &())
                .await?;
            remove_finalizer(ctx.managers.as_ref(), manager.as_ref(), CRDS_FINALIZER).await?;
            return Ok(Action::await_change());
        }

        add_finalizer(ctx.managers.as_ref(), manager.as_ref(), CRDS_FINALIZER).await?;
        let summary = ctx
            .applier
            .apply_manifests(&regarding, &BROKER_CRDS, &())
            .await?;
        record_manifest_writes(summary.created, summary.updated);
        Ok(Action::requeue(Duration::from_secs(600)))
    }
    .await;

    if result.is_ok() {
        ctx.backoff.on_success(&manager.name_any());
    }
    timer.observe(result)
}

/// Requeue with backoff
pub fn error_policy(manager: Arc<ClusterManager>, error: &Error, ctx: Arc<BrokerCrdsContext>) -> Action {
    ctx.backoff.on_error(&manager.name_any(), error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::renderer;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::ObjectMeta;
    use submariner_addon_common::crd::ClusterManagerSpec;
    use submariner_addon_common::error::api_error;
    use submariner_addon_common::events::NoopEventPublisher;
    use submariner_addon_common::manifests::{Manifest, MockManifestClient};
    use submariner_addon_common::status::MockResourceClient;

    fn manager(finalizers: &[&str], deleting: bool) -> ClusterManager {
        ClusterManager {
            metadata: ObjectMeta {
                name: Some("cluster-manager".to_string()),
                finalizers: Some(finalizers.iter().map(|f| f.to_string()).collect()),
                deletion_timestamp: deleting.then(|| Time(chrono::Utc::now())),
                ..Default::default()
            },
            spec: ClusterManagerSpec::default(),
        }
    }

    fn context(managers: MockResourceClient<ClusterManager>, crds: MockManifestClient) -> Arc<BrokerCrdsContext> {
        Arc::new(BrokerCrdsContext::new(
            Arc::new(managers),
            ManifestApplier::new(Arc::new(crds), Arc::new(NoopEventPublisher), Arc::new(renderer())),
        ))
    }

    #[tokio::test]
    async fn crds_are_installed() {
        let mut managers = MockResourceClient::<ClusterManager>::new();
        managers.expect_replace().never();

        let mut crds = MockManifestClient::new();
        crds.expect_get().returning(|_| Ok(None));
        crds.expect_create()
            .withf(|m| matches!(m, Manifest::CustomResourceDefinition(_)))
            .times(BROKER_CRDS.len())
            .returning(|_| Ok(()));

        reconcile(Arc::new(manager(&[CRDS_FINALIZER], false)), context(managers, crds))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn deletion_failure_keeps_finalizer() {
        let mut managers = MockResourceClient::<ClusterManager>::new();
        managers.expect_replace().never();

        let mut crds = MockManifestClient::new();
        crds.expect_delete()
            .returning(|_| Err(api_error(500, "InternalError").into()));

        let err = reconcile(Arc::new(manager(&[CRDS_FINALIZER], true)), context(managers, crds))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Aggregate(ref e) if e.len() == BROKER_CRDS.len()));
    }
}
