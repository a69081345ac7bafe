//! Create-or-update and delete of rendered manifests
//!
//! Every template file is handled independently: a failure in one file is
//! recorded and the remaining files are still applied. The caller gets one
//! aggregated error listing every failure.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{DeleteParams, PostParams};
use kube::runtime::events::EventType;
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::kinds::Manifest;
use super::render::{decode_manifests, ManifestRenderer};
use crate::events::{actions, reasons, EventPublisher};
use crate::redact::redact_secrets;
use crate::Error;

/// Typed CRUD over [`Manifest`]s
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ManifestClient: Send + Sync {
    /// Fetch the live object with the same identity
    async fn get(&self, manifest: &Manifest) -> Result<Option<Manifest>, Error>;

    /// Create the object
    async fn create(&self, manifest: &Manifest) -> Result<(), Error>;

    /// Replace the object
    async fn update(&self, manifest: &Manifest) -> Result<(), Error>;

    /// Delete the object; not-found is success
    async fn delete(&self, manifest: &Manifest) -> Result<(), Error>;
}

/// [`ManifestClient`] backed by the Kubernetes API
pub struct KubeManifestClient {
    client: Client,
}

impl KubeManifestClient {
    /// Wrap a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn namespaced<K>(client: &Client, obj: &K) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match obj.namespace() {
        Some(ns) => Api::namespaced(client.clone(), &ns),
        None => Api::default_namespaced(client.clone()),
    }
}

fn cluster_scoped<K>(client: &Client, _obj: &K) -> Api<K>
where
    K: Resource<Scope = ClusterResourceScope, DynamicType = ()>,
{
    Api::all(client.clone())
}

macro_rules! with_api {
    ($client:expr, $manifest:expr, $api:ident, $obj:ident => $body:expr) => {
        match $manifest {
            Manifest::Namespace($obj) => {
                let $api = cluster_scoped(&$client, $obj);
                $body
            }
            Manifest::ClusterRole($obj) => {
                let $api = cluster_scoped(&$client, $obj);
                $body
            }
            Manifest::ClusterRoleBinding($obj) => {
                let $api = cluster_scoped(&$client, $obj);
                $body
            }
            Manifest::CustomResourceDefinition($obj) => {
                let $api = cluster_scoped(&$client, $obj);
                $body
            }
            Manifest::ServiceAccount($obj) => {
                let $api = namespaced(&$client, $obj);
                $body
            }
            Manifest::Secret($obj) => {
                let $api = namespaced(&$client, $obj);
                $body
            }
            Manifest::ConfigMap($obj) => {
                let $api = namespaced(&$client, $obj);
                $body
            }
            Manifest::Role($obj) => {
                let $api = namespaced(&$client, $obj);
                $body
            }
            Manifest::RoleBinding($obj) => {
                let $api = namespaced(&$client, $obj);
                $body
            }
            Manifest::Deployment($obj) => {
                let $api = namespaced(&$client, $obj);
                $body
            }
            Manifest::DaemonSet($obj) => {
                let $api = namespaced(&$client, $obj);
                $body
            }
        }
    };
}

#[async_trait]
impl ManifestClient for KubeManifestClient {
    async fn get(&self, manifest: &Manifest) -> Result<Option<Manifest>, Error> {
        with_api!(self.client, manifest, api, obj => {
            Ok(api.get_opt(&obj.name_any()).await?.map(Manifest::from))
        })
    }

    async fn create(&self, manifest: &Manifest) -> Result<(), Error> {
        with_api!(self.client, manifest, api, obj => {
            api.create(&PostParams::default(), obj).await?;
            Ok(())
        })
    }

    async fn update(&self, manifest: &Manifest) -> Result<(), Error> {
        with_api!(self.client, manifest, api, obj => {
            api.replace(&obj.name_any(), &PostParams::default(), obj).await?;
            Ok(())
        })
    }

    async fn delete(&self, manifest: &Manifest) -> Result<(), Error> {
        with_api!(self.client, manifest, api, obj => {
            match api.delete(&obj.name_any(), &DeleteParams::default()).await {
                Ok(_) => Ok(()),
                Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}

/// What happened to each object of an apply pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Objects created
    pub created: usize,
    /// Objects updated
    pub updated: usize,
    /// Objects already up to date
    pub unchanged: usize,
}

enum Outcome {
    Created,
    Updated,
    Unchanged,
}

/// Renders template files and reconciles them against the cluster
#[derive(Clone)]
pub struct ManifestApplier {
    client: Arc<dyn ManifestClient>,
    events: Arc<dyn EventPublisher>,
    renderer: Arc<ManifestRenderer>,
}

impl ManifestApplier {
    /// Create an applier
    pub fn new(
        client: Arc<dyn ManifestClient>,
        events: Arc<dyn EventPublisher>,
        renderer: Arc<ManifestRenderer>,
    ) -> Self {
        Self {
            client,
            events,
            renderer,
        }
    }

    /// The renderer, for callers that embed manifests elsewhere
    pub fn renderer(&self) -> &ManifestRenderer {
        &self.renderer
    }

    fn render<C: Serialize>(&self, file: &str, config: &C) -> Result<Vec<Manifest>, Error> {
        let text = self.renderer.render(file, config)?;
        trace!(file, manifest = %redact_secrets(&text), "Rendered manifest");
        Ok(decode_manifests(file, &text)?)
    }

    /// Create or update every object rendered from `files`.
    ///
    /// Events are published on `regarding` for each create and update.
    pub async fn apply_manifests<C>(
        &self,
        regarding: &ObjectReference,
        files: &[&str],
        config: &C,
    ) -> Result<ApplySummary, Error>
    where
        C: Serialize + Sync,
    {
        let mut summary = ApplySummary::default();
        let mut errors = Vec::new();

        for file in files {
            let manifests = match self.render(file, config) {
                Ok(m) => m,
                Err(e) => {
                    warn!(file, error = %e, "Failed to render manifest");
                    errors.push(e);
                    continue;
                }
            };

            for manifest in manifests {
                match self.apply_one(&manifest).await {
                    Ok(Outcome::Created) => {
                        summary.created += 1;
                        self.publish(regarding, reasons::MANIFEST_CREATED, &manifest, "created")
                            .await;
                    }
                    Ok(Outcome::Updated) => {
                        summary.updated += 1;
                        self.publish(regarding, reasons::MANIFEST_UPDATED, &manifest, "updated")
                            .await;
                    }
                    Ok(Outcome::Unchanged) => summary.unchanged += 1,
                    Err(e) => {
                        warn!(file, object = %manifest.describe(), error = %e, "Failed to apply manifest");
                        errors.push(Error::internal_with_context(
                            "manifest-apply",
                            format!("{} ({}): {}", manifest.describe(), file, e),
                        ));
                    }
                }
            }
        }

        Error::from_errors(errors)?;
        debug!(
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            "Manifests applied"
        );
        Ok(summary)
    }

    async fn apply_one(&self, desired: &Manifest) -> Result<Outcome, Error> {
        let Some(existing) = self.client.get(desired).await? else {
            self.client.create(desired).await?;
            info!(object = %desired.describe(), "Created");
            return Ok(Outcome::Created);
        };

        match desired.merged_onto(existing)? {
            Some(merged) => {
                self.client.update(&merged).await?;
                info!(object = %desired.describe(), "Updated");
                Ok(Outcome::Updated)
            }
            None => Ok(Outcome::Unchanged),
        }
    }

    /// Delete every object rendered from `files`. Missing objects are fine.
    pub async fn delete_from_manifests<C>(
        &self,
        regarding: &ObjectReference,
        files: &[&str],
        config: &C,
    ) -> Result<(), Error>
    where
        C: Serialize + Sync,
    {
        let mut errors = Vec::new();

        for file in files {
            let manifests = match self.render(file, config) {
                Ok(m) => m,
                Err(e) => {
                    warn!(file, error = %e, "Failed to render manifest");
                    errors.push(e);
                    continue;
                }
            };

            for manifest in manifests {
                match self.client.delete(&manifest).await {
                    Ok(()) => {
                        info!(object = %manifest.describe(), "Deleted");
                        self.publish(regarding, reasons::MANIFEST_DELETED, &manifest, "deleted")
                            .await;
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        warn!(file, object = %manifest.describe(), error = %e, "Failed to delete manifest");
                        errors.push(Error::internal_with_context(
                            "manifest-delete",
                            format!("{} ({}): {}", manifest.describe(), file, e),
                        ));
                    }
                }
            }
        }

        Error::from_errors(errors)
    }

    async fn publish(
        &self,
        regarding: &ObjectReference,
        reason: &str,
        manifest: &Manifest,
        verb: &str,
    ) {
        let action = if verb == "deleted" {
            actions::DELETE
        } else {
            actions::APPLY
        };
        self.events
            .publish(
                regarding,
                EventType::Normal,
                reason,
                action,
                Some(format!("{} {}", manifest.describe(), verb)),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::api_error;
    use crate::events::NoopEventPublisher;
    use crate::manifests::Asset;
    use serde_json::json;
    use std::sync::Mutex;

    static ASSETS: &[Asset] = &[
        Asset {
            path: "manifests/ns.yaml",
            content: "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: {{ Namespace }}\n",
        },
        Asset {
            path: "manifests/role.yaml",
            content: r#"apiVersion: rbac.authorization.k8s.io/v1
kind: Role
metadata:
  name: submariner-k8s-broker-cluster
  namespace: {{ Namespace }}
rules:
- apiGroups: ["submariner.io"]
  resources: ["endpoints", "clusters"]
  verbs: ["get", "list", "watch", "create", "update", "delete"]
"#,
        },
        Asset {
            path: "manifests/bad.yaml",
            content: "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: j\n",
        },
    ];

    /// In-memory store keyed by `describe()`
    #[derive(Default)]
    struct FakeCluster {
        objects: Mutex<Vec<Manifest>>,
        creates: Mutex<usize>,
        updates: Mutex<usize>,
    }

    #[async_trait]
    impl ManifestClient for FakeCluster {
        async fn get(&self, manifest: &Manifest) -> Result<Option<Manifest>, Error> {
            let objects = self.objects.lock().unwrap();
            Ok(objects
                .iter()
                .find(|o| o.describe() == manifest.describe())
                .cloned())
        }

        async fn create(&self, manifest: &Manifest) -> Result<(), Error> {
            *self.creates.lock().unwrap() += 1;
            self.objects.lock().unwrap().push(manifest.clone());
            Ok(())
        }

        async fn update(&self, manifest: &Manifest) -> Result<(), Error> {
            *self.updates.lock().unwrap() += 1;
            let mut objects = self.objects.lock().unwrap();
            objects.retain(|o| o.describe() != manifest.describe());
            objects.push(manifest.clone());
            Ok(())
        }

        async fn delete(&self, manifest: &Manifest) -> Result<(), Error> {
            self.objects
                .lock()
                .unwrap()
                .retain(|o| o.describe() != manifest.describe());
            Ok(())
        }
    }

    fn applier(client: Arc<dyn ManifestClient>) -> ManifestApplier {
        ManifestApplier::new(
            client,
            Arc::new(NoopEventPublisher),
            Arc::new(ManifestRenderer::new(ASSETS)),
        )
    }

    fn regarding() -> ObjectReference {
        ObjectReference {
            kind: Some("ManagedClusterSet".to_string()),
            name: Some("set1".to_string()),
            ..Default::default()
        }
    }

    const FILES: &[&str] = &["manifests/ns.yaml", "manifests/role.yaml"];

    #[tokio::test]
    async fn second_apply_is_a_noop() {
        let cluster = Arc::new(FakeCluster::default());
        let applier = applier(cluster.clone());
        let config = json!({"Namespace": "set1-broker"});

        let first = applier
            .apply_manifests(&regarding(), FILES, &config)
            .await
            .unwrap();
        assert_eq!(first.created, 2);

        let second = applier
            .apply_manifests(&regarding(), FILES, &config)
            .await
            .unwrap();
        assert_eq!(second, ApplySummary { created: 0, updated: 0, unchanged: 2 });
        assert_eq!(*cluster.updates.lock().unwrap(), 0);
        assert_eq!(*cluster.creates.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn changed_output_is_updated() {
        let cluster = Arc::new(FakeCluster::default());
        let applier = applier(cluster.clone());

        applier
            .apply_manifests(&regarding(), &["manifests/role.yaml"], &json!({"Namespace": "a"}))
            .await
            .unwrap();

        // Simulate drift on the live object
        {
            let mut objects = cluster.objects.lock().unwrap();
            if let Manifest::Role(role) = &mut objects[0] {
                role.rules.as_mut().unwrap()[0].verbs = vec!["get".to_string()];
            }
        }

        let summary = applier
            .apply_manifests(&regarding(), &["manifests/role.yaml"], &json!({"Namespace": "a"}))
            .await
            .unwrap();
        assert_eq!(summary.updated, 1);
    }

    #[tokio::test]
    async fn failures_are_aggregated_and_other_files_still_apply() {
        let mut client = MockManifestClient::new();
        client.expect_get().returning(|_| Ok(None));
        client.expect_create().returning(|m| {
            if m.kind() == "Role" {
                Err(api_error(403, "Forbidden").into())
            } else {
                Ok(())
            }
        });

        let applier = applier(Arc::new(client));
        let err = applier
            .apply_manifests(
                &regarding(),
                &["manifests/bad.yaml", "manifests/role.yaml", "manifests/ns.yaml"],
                &json!({"Namespace": "set1-broker"}),
            )
            .await
            .unwrap_err();

        let text = err.to_string();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("unsupported kind batch/v1/Job"));
        assert!(text.contains("Role set1-broker/submariner-k8s-broker-cluster"));
    }

    #[tokio::test]
    async fn apis_follow_the_object_scope() {
        use k8s_openapi::api::core::v1::{Namespace, Secret};

        let config = kube::Config::new("http://127.0.0.1:6443".parse().unwrap());
        let client = Client::try_from(config).unwrap();

        let ns = Namespace::default();
        assert_eq!(cluster_scoped(&client, &ns).resource_url(), "/api/v1/namespaces");

        let mut secret = Secret::default();
        secret.metadata.namespace = Some("set1-broker".to_string());
        assert_eq!(
            namespaced(&client, &secret).resource_url(),
            "/api/v1/namespaces/set1-broker/secrets"
        );
    }

    #[tokio::test]
    async fn delete_tolerates_missing_objects() {
        let mut client = MockManifestClient::new();
        client
            .expect_delete()
            .times(2)
            .returning(|_| Err(api_error(404, "NotFound").into()));

        let applier = applier(Arc::new(client));
        applier
            .delete_from_manifests(&regarding(), FILES, &json!({"Namespace": "set1-broker"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_reports_real_failures() {
        let mut client = MockManifestClient::new();
        client
            .expect_delete()
            .returning(|_| Err(api_error(500, "InternalError").into()));

        let applier = applier(Arc::new(client));
        let err = applier
            .delete_from_manifests(&regarding(), FILES, &json!({"Namespace": "set1-broker"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string().lines().count(), 2);
    }
}
