//! ManifestWork construction and create-or-update
//!
//! A ManifestWork is rewritten only when its `spec` differs from the live
//! object, so an unchanged render never bumps the resourceVersion and never
//! re-triggers the work agent on the spoke.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{DeleteParams, ObjectMeta, PostParams};
use kube::runtime::events::EventType;
use kube::{Api, Client};
use serde_json::Value;
use tracing::{debug, info};

use crate::crd::{ManifestWork, ManifestWorkSpec, ManifestsTemplate};
use crate::events::{actions, reasons, EventPublisher};
use crate::Error;

/// ManifestWork carrying the operator bundle
pub const OPERATOR_WORK_NAME: &str = "submariner-operator";
/// ManifestWork carrying the `Submariner` CR
pub const RESOURCE_WORK_NAME: &str = "submariner-resource";
/// ManifestWork carrying dedicated gateway MachineSets
pub const GATEWAY_MACHINESETS_WORK_NAME: &str = "submariner-gateway-machinesets";

/// Label set on every ManifestWork the addon creates
pub const WORK_ADDON_LABEL: &str = "addon.open-cluster-management.io/name";

/// Access to ManifestWorks in cluster namespaces
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ManifestWorkClient: Send + Sync {
    /// Fetch a ManifestWork
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ManifestWork>, Error>;

    /// Create a ManifestWork
    async fn create(&self, work: &ManifestWork) -> Result<(), Error>;

    /// Replace a ManifestWork
    async fn replace(&self, work: &ManifestWork) -> Result<(), Error>;

    /// Delete a ManifestWork; not-found is success
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// [`ManifestWorkClient`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeManifestWorkClient {
    client: Client,
}

impl KubeManifestWorkClient {
    /// Wrap a hub client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ManifestWork> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn work_namespace(work: &ManifestWork) -> Result<&str, Error> {
    work.metadata
        .namespace
        .as_deref()
        .ok_or_else(|| Error::validation_for("ManifestWork", "namespace is required"))
}

fn work_name(work: &ManifestWork) -> Result<&str, Error> {
    work.metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::validation_for("ManifestWork", "name is required"))
}

#[async_trait]
impl ManifestWorkClient for KubeManifestWorkClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ManifestWork>, Error> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn create(&self, work: &ManifestWork) -> Result<(), Error> {
        self.api(work_namespace(work)?)
            .create(&PostParams::default(), work)
            .await?;
        Ok(())
    }

    async fn replace(&self, work: &ManifestWork) -> Result<(), Error> {
        self.api(work_namespace(work)?)
            .replace(work_name(work)?, &PostParams::default(), work)
            .await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error> {
        match self
            .api(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Build a ManifestWork named `name` in `namespace` carrying `manifests`
pub fn build_manifest_work(namespace: &str, name: &str, manifests: Vec<Value>) -> ManifestWork {
    ManifestWork {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                WORK_ADDON_LABEL.to_string(),
                crate::crd::ADDON_NAME.to_string(),
            )])),
            ..Default::default()
        },
        spec: ManifestWorkSpec {
            workload: ManifestsTemplate { manifests },
            delete_option: None,
        },
        status: None,
    }
}

/// Result of [`apply_manifest_work`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    /// The work did not exist
    Created,
    /// The spec changed
    Updated,
    /// Live spec already matched
    Unchanged,
}

/// Create `desired`, or replace the live work when its spec differs.
///
/// Events are published on `regarding` for creates and updates.
pub async fn apply_manifest_work(
    client: &dyn ManifestWorkClient,
    events: &dyn EventPublisher,
    regarding: &ObjectReference,
    desired: ManifestWork,
) -> Result<WorkOutcome, Error> {
    let namespace = work_namespace(&desired)?.to_string();
    let name = work_name(&desired)?.to_string();

    let Some(mut existing) = client.get(&namespace, &name).await? else {
        client.create(&desired).await?;
        info!(namespace = %namespace, work = %name, "ManifestWork created");
        events
            .publish(
                regarding,
                EventType::Normal,
                reasons::MANIFEST_WORK_CREATED,
                actions::APPLY,
                Some(format!("ManifestWork {namespace}/{name} created")),
            )
            .await;
        return Ok(WorkOutcome::Created);
    };

    if existing.spec == desired.spec {
        debug!(namespace = %namespace, work = %name, "ManifestWork unchanged");
        return Ok(WorkOutcome::Unchanged);
    }

    existing.spec = desired.spec;
    if let Some(labels) = desired.metadata.labels {
        existing
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels);
    }
    client.replace(&existing).await?;
    info!(namespace = %namespace, work = %name, "ManifestWork updated");
    events
        .publish(
            regarding,
            EventType::Normal,
            reasons::MANIFEST_WORK_UPDATED,
            actions::APPLY,
            Some(format!("ManifestWork {namespace}/{name} updated")),
        )
        .await;
    Ok(WorkOutcome::Updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventPublisher;
    use serde_json::json;

    fn work(manifests: Vec<Value>) -> ManifestWork {
        build_manifest_work("cluster1", OPERATOR_WORK_NAME, manifests)
    }

    fn namespace_manifest(name: &str) -> Value {
        json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": name}})
    }

    #[tokio::test]
    async fn missing_work_is_created() {
        let mut client = MockManifestWorkClient::new();
        client
            .expect_get()
            .withf(|ns, name| ns == "cluster1" && name == OPERATOR_WORK_NAME)
            .returning(|_, _| Ok(None));
        client.expect_create().times(1).returning(|_| Ok(()));
        client.expect_replace().never();

        let outcome = apply_manifest_work(
            &client,
            &NoopEventPublisher,
            &ObjectReference::default(),
            work(vec![namespace_manifest("submariner-operator")]),
        )
        .await
        .unwrap();
        assert_eq!(outcome, WorkOutcome::Created);
    }

    #[tokio::test]
    async fn equal_spec_is_not_rewritten() {
        let mut client = MockManifestWorkClient::new();
        client.expect_get().returning(|_, _| {
            let mut live = work(vec![namespace_manifest("submariner-operator")]);
            live.metadata.resource_version = Some("42".to_string());
            Ok(Some(live))
        });
        client.expect_create().never();
        client.expect_replace().never();

        let outcome = apply_manifest_work(
            &client,
            &NoopEventPublisher,
            &ObjectReference::default(),
            work(vec![namespace_manifest("submariner-operator")]),
        )
        .await
        .unwrap();
        assert_eq!(outcome, WorkOutcome::Unchanged);
    }

    #[tokio::test]
    async fn changed_spec_keeps_resource_version() {
        let mut client = MockManifestWorkClient::new();
        client.expect_get().returning(|_, _| {
            let mut live = work(vec![namespace_manifest("old")]);
            live.metadata.resource_version = Some("42".to_string());
            Ok(Some(live))
        });
        client
            .expect_replace()
            .withf(|w| {
                w.metadata.resource_version.as_deref() == Some("42")
                    && w.spec.workload.manifests[0]["metadata"]["name"] == "new"
            })
            .times(1)
            .returning(|_| Ok(()));

        let outcome = apply_manifest_work(
            &client,
            &NoopEventPublisher,
            &ObjectReference::default(),
            work(vec![namespace_manifest("new")]),
        )
        .await
        .unwrap();
        assert_eq!(outcome, WorkOutcome::Updated);
    }

    #[test]
    fn built_work_is_labelled() {
        let w = work(vec![]);
        assert_eq!(
            w.metadata.labels.unwrap().get(WORK_ADDON_LABEL).map(String::as_str),
            Some("submariner")
        );
    }
}
