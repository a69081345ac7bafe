//! Kubernetes Events on the objects the addon acts on
//!
//! Publishing never fails a reconcile: a rejected Event is logged and dropped.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::warn;

/// Sink for Events about addon-managed objects
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Record `reason`/`action` on `regarding`, with an optional note
    async fn publish(
        &self,
        regarding: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// [`EventPublisher`] writing `events.k8s.io/v1` Events
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Events are reported by `component`, instance `$POD_NAME` when set
    pub fn new(client: Client, component: &str) -> Self {
        let reporter = Reporter {
            controller: component.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        regarding: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, regarding).await {
            warn!(
                object = ?regarding.name,
                reason,
                error = %e,
                "Dropping event"
            );
        }
    }
}

/// Discards every Event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _regarding: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Object reference for any typed resource
pub fn object_ref<K>(obj: &K) -> ObjectReference
where
    K: Resource<DynamicType = ()>,
{
    obj.object_ref(&())
}

/// Event reasons
pub mod reasons {
    /// Manifest object created
    pub const MANIFEST_CREATED: &str = "ManifestCreated";
    /// Manifest object updated
    pub const MANIFEST_UPDATED: &str = "ManifestUpdated";
    /// Manifest object deleted
    pub const MANIFEST_DELETED: &str = "ManifestDeleted";
    /// ManifestWork created
    pub const MANIFEST_WORK_CREATED: &str = "ManifestWorkCreated";
    /// ManifestWork updated
    pub const MANIFEST_WORK_UPDATED: &str = "ManifestWorkUpdated";
    /// Cloud environment prepared
    pub const CLOUD_PREPARED: &str = "SubmarinerClusterEnvironmentPrepared";
    /// Cloud environment preparation failed
    pub const CLOUD_PREPARE_FAILED: &str = "SubmarinerClusterEnvironmentPreparationFailed";
    /// Cloud environment cleaned up
    pub const CLOUD_CLEANED_UP: &str = "SubmarinerClusterEnvironmentCleanedUp";
    /// Cloud preparation step progress
    pub const CLOUD_PROGRESS: &str = "CloudPrepareProgress";
    /// Gateway label added to a node
    pub const GATEWAY_LABELED: &str = "GatewayNodeLabeled";
    /// Gateway label removed from a node
    pub const GATEWAY_UNLABELED: &str = "GatewayNodeUnlabeled";
}

/// Event actions
pub mod actions {
    /// Applying manifests
    pub const APPLY: &str = "Apply";
    /// Deleting resources
    pub const DELETE: &str = "Delete";
    /// Preparing a cloud environment
    pub const PREPARE: &str = "Prepare";
    /// Cleaning up a cloud environment
    pub const CLEANUP: &str = "Cleanup";
    /// Labelling nodes
    pub const LABEL: &str = "Label";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{SubmarinerConfig, SubmarinerConfigSpec};

    #[test]
    fn object_ref_names_the_resource() {
        let mut config = SubmarinerConfig::new("submariner", SubmarinerConfigSpec::default());
        config.metadata.namespace = Some("cluster1".to_string());

        let r = object_ref(&config);
        assert_eq!(r.kind.as_deref(), Some("SubmarinerConfig"));
        assert_eq!(r.name.as_deref(), Some("submariner"));
        assert_eq!(r.namespace.as_deref(), Some("cluster1"));
    }

    #[tokio::test]
    async fn noop_publisher_does_not_panic() {
        NoopEventPublisher
            .publish(
                &ObjectReference::default(),
                EventType::Normal,
                reasons::MANIFEST_CREATED,
                actions::APPLY,
                Some("test".to_string()),
            )
            .await;
    }
}
