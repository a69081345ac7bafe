//! Broker controller
//!
//! Each ManagedClusterSet gets a broker namespace holding the RBAC that member
//! clusters use to exchange endpoints, and the IPsec PSK they share.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use submariner_addon_common::crd::ManagedClusterSet;
use submariner_addon_common::events::object_ref;
use submariner_addon_common::finalizer::{add_finalizer, is_being_deleted, remove_finalizer};
use submariner_addon_common::manifests::ManifestApplier;
use submariner_addon_common::metrics::{record_manifest_writes, ReconcileTimer};
use submariner_addon_common::status::ResourceClient;
use submariner_addon_common::{broker_namespace, controller::ReconcileBackoff, Error};
use tracing::{debug, info, instrument};

use crate::assets::{BrokerConfig, BROKER_ADMIN, BROKER_CLUSTER_ROLE, BROKER_NAMESPACE};
use crate::secrets::{ensure_ipsec_psk, SecretClient};

/// Finalizer held on ManagedClusterSets until their broker is removed
pub const BROKER_FINALIZER: &str = "cluster.open-cluster-management.io/submariner-cleanup";

/// Periodic resync
const RESYNC: Duration = Duration::from_secs(600);

/// Broker files, in apply order; deletion runs in reverse
const BROKER_FILES: [&str; 3] = [BROKER_NAMESPACE, BROKER_CLUSTER_ROLE, BROKER_ADMIN];

/// Shared state of the broker controller
pub struct BrokerContext {
    /// ManagedClusterSet access for finalizers
    pub sets: Arc<dyn ResourceClient<ManagedClusterSet>>,
    /// Hub secrets
    pub secrets: Arc<dyn SecretClient>,
    /// Broker manifest applier
    pub applier: ManifestApplier,
    /// Requeue backoff
    pub backoff: ReconcileBackoff,
}

impl BrokerContext {
    /// Create a context
    pub fn new(
        sets: Arc<dyn ResourceClient<ManagedClusterSet>>,
        secrets: Arc<dyn SecretClient>,
        applier: ManifestApplier,
    ) -> Self {
        Self {
            sets,
            secrets,
            applier,
            backoff: ReconcileBackoff::new(),
        }
    }
}

/// Reconcile a ManagedClusterSet into its broker namespace
#[instrument(skip(set, ctx), fields(cluster_set = %set.name_any()))]
pub async fn reconcile(set: Arc<ManagedClusterSet>, ctx: Arc<BrokerContext>) -> Result<Action, Error> {
    let timer = ReconcileTimer::start("broker");
    let result = reconcile_inner(&set, &ctx).await;
    if result.is_ok() {
        ctx.backoff.on_success(&set.name_any());
    }
    timer.observe(result)
}

async fn reconcile_inner(set: &ManagedClusterSet, ctx: &BrokerContext) -> Result<Action, Error> {
    let name = set.name_any();
    let config = BrokerConfig {
        cluster_set: name.clone(),
        broker_namespace: broker_namespace(&name),
    };
    let regarding = object_ref(set);

    if is_being_deleted(set) {
        info!("Cluster set deleted, removing broker");
        let mut files = BROKER_FILES.to_vec();
        files.reverse();
        ctx.applier
            .delete_from_manifests(&regarding, &files, &config)
            .await?;
        remove_finalizer(ctx.sets.as_ref(), set, BROKER_FINALIZER).await?;
        return Ok(Action::await_change());
    }

    if add_finalizer(ctx.sets.as_ref(), set, BROKER_FINALIZER).await? {
        debug!("Broker finalizer added");
    }

    let summary = ctx
        .applier
        .apply_manifests(&regarding, &BROKER_FILES, &config)
        .await?;
    record_manifest_writes(summary.created, summary.updated);

    ensure_ipsec_psk(ctx.secrets.as_ref(), &config.broker_namespace).await?;

    Ok(Action::requeue(RESYNC))
}

/// Requeue with per-set backoff
pub fn error_policy(set: Arc<ManagedClusterSet>, error: &Error, ctx: Arc<BrokerContext>) -> Action {
    ctx.backoff.on_error(&set.name_any(), error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::renderer;
    use crate::secrets::MockSecretClient;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::ObjectMeta;
    use std::sync::Mutex;
    use submariner_addon_common::crd::ManagedClusterSetSpec;
    use submariner_addon_common::events::NoopEventPublisher;
    use submariner_addon_common::manifests::{Manifest, MockManifestClient};
    use submariner_addon_common::status::MockResourceClient;

    fn cluster_set(finalizers: &[&str], deleting: bool) -> ManagedClusterSet {
        ManagedClusterSet {
            metadata: ObjectMeta {
                name: Some("set1".to_string()),
                finalizers: Some(finalizers.iter().map(|f| f.to_string()).collect()),
                deletion_timestamp: deleting.then(|| Time(chrono::Utc::now())),
                ..Default::default()
            },
            spec: ManagedClusterSetSpec::default(),
            status: None,
        }
    }

    fn applier(client: MockManifestClient) -> ManifestApplier {
        ManifestApplier::new(
            Arc::new(client),
            Arc::new(NoopEventPublisher),
            Arc::new(renderer()),
        )
    }

    #[tokio::test]
    async fn new_set_gets_finalizer_broker_and_psk() {
        let mut sets = MockResourceClient::<ManagedClusterSet>::new();
        sets.expect_get_opt()
            .returning(|_| Ok(Some(cluster_set(&[], false))));
        sets.expect_replace()
            .withf(|_, s| s.finalizers() == [BROKER_FINALIZER.to_string()])
            .times(1)
            .returning(|_, s| Ok(s.clone()));

        let created = Arc::new(Mutex::new(Vec::new()));
        let mut manifests = MockManifestClient::new();
        manifests.expect_get().returning(|_| Ok(None));
        let seen = created.clone();
        manifests.expect_create().returning(move |m| {
            seen.lock().unwrap().push(m.describe());
            Ok(())
        });

        let mut secrets = MockSecretClient::new();
        secrets.expect_get().returning(|_, _| Ok(None));
        secrets
            .expect_create()
            .withf(|s| s.namespace().as_deref() == Some("set1-broker"))
            .times(1)
            .returning(|_| Ok(true));

        let ctx = Arc::new(BrokerContext::new(
            Arc::new(sets),
            Arc::new(secrets),
            applier(manifests),
        ));
        let action = reconcile(Arc::new(cluster_set(&[], false)), ctx).await.unwrap();

        assert_eq!(action, Action::requeue(RESYNC));
        let created = created.lock().unwrap();
        assert_eq!(created[0], "Namespace set1-broker");
        assert!(created.contains(&"Role set1-broker/submariner-k8s-broker-cluster".to_string()));
    }

    #[tokio::test]
    async fn deleted_set_removes_broker_and_finalizer() {
        let mut sets = MockResourceClient::<ManagedClusterSet>::new();
        sets.expect_get_opt()
            .returning(|_| Ok(Some(cluster_set(&["other", BROKER_FINALIZER], true))));
        sets.expect_replace()
            .withf(|_, s| s.finalizers() == ["other".to_string()])
            .times(1)
            .returning(|_, s| Ok(s.clone()));

        let deleted = Arc::new(Mutex::new(Vec::new()));
        let mut manifests = MockManifestClient::new();
        let seen = deleted.clone();
        manifests.expect_delete().returning(move |m: &Manifest| {
            seen.lock().unwrap().push(m.kind());
            Ok(())
        });
        manifests.expect_create().never();

        let mut secrets = MockSecretClient::new();
        secrets.expect_create().never();

        let ctx = Arc::new(BrokerContext::new(
            Arc::new(sets),
            Arc::new(secrets),
            applier(manifests),
        ));
        let action = reconcile(
            Arc::new(cluster_set(&["other", BROKER_FINALIZER], true)),
            ctx,
        )
        .await
        .unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(deleted.lock().unwrap().last(), Some(&"Namespace"));
    }
}
