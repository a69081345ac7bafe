//! Progress reporting through Kubernetes events and logs

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use submariner_addon_common::events::{actions, reasons, EventPublisher};
use submariner_addon_common::Error;
use tracing::{info, warn};

use crate::api::StatusReporter;
use crate::platform::Platform;

/// Publishes each cloud step as an event on the SubmarinerConfig
pub struct EventStatusReporter {
    events: Arc<dyn EventPublisher>,
    regarding: ObjectReference,
    cluster: String,
    platform: Platform,
}

impl EventStatusReporter {
    /// Report on `regarding` for `cluster`
    pub fn new(
        events: Arc<dyn EventPublisher>,
        regarding: ObjectReference,
        cluster: impl Into<String>,
        platform: Platform,
    ) -> Self {
        Self {
            events,
            regarding,
            cluster: cluster.into(),
            platform,
        }
    }
}

#[async_trait]
impl StatusReporter for EventStatusReporter {
    async fn start(&self, message: &str) {
        info!(cluster = %self.cluster, platform = %self.platform, "{message}");
        self.events
            .publish(
                &self.regarding,
                EventType::Normal,
                reasons::CLOUD_PROGRESS,
                actions::PREPARE,
                Some(message.to_string()),
            )
            .await;
    }

    async fn succeeded(&self, message: &str) {
        info!(cluster = %self.cluster, platform = %self.platform, "{message}");
        self.events
            .publish(
                &self.regarding,
                EventType::Normal,
                reasons::CLOUD_PROGRESS,
                actions::PREPARE,
                Some(message.to_string()),
            )
            .await;
    }

    async fn failed(&self, error: &Error) {
        warn!(cluster = %self.cluster, platform = %self.platform, error = %error, "Cloud step failed");
        self.events
            .publish(
                &self.regarding,
                EventType::Warning,
                reasons::CLOUD_PREPARE_FAILED,
                actions::PREPARE,
                Some(error.to_string()),
            )
            .await;
    }
}
