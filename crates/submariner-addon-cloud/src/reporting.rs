//! Cloud backend that records the required openings without calling a cloud SDK

use async_trait::async_trait;
use submariner_addon_common::Error;
use tracing::{debug, info};

use crate::api::{CloudContext, CloudPrepare, StatusReporter};
use crate::ports::{describe_ports, PortSpec};

/// Reports every opening through the [`StatusReporter`].
///
/// Clusters whose security groups are managed out of band use this backend;
/// SDK-backed implementations plug in through [`CloudPrepare`].
#[derive(Clone, Debug, Default)]
pub struct ReportingCloudApi;

impl ReportingCloudApi {
    /// Create the backend
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CloudPrepare for ReportingCloudApi {
    async fn prepare_for_submariner(
        &self,
        context: &CloudContext,
        ports: &[PortSpec],
        reporter: &dyn StatusReporter,
    ) -> Result<(), Error> {
        let (internal, external): (Vec<PortSpec>, Vec<PortSpec>) =
            ports.iter().cloned().partition(|p| p.internal);

        if !external.is_empty() {
            reporter
                .start(&format!(
                    "Opening gateway ports for {} in {}: {}",
                    context.infra_id,
                    context.region,
                    describe_ports(&external)
                ))
                .await;
            debug!(cluster = %context.cluster_name, count = external.len(), "Recorded gateway openings");
            reporter.succeeded("Opened gateway ports").await;
        }

        if !internal.is_empty() {
            reporter
                .start(&format!(
                    "Opening internal ports for {}: {}",
                    context.infra_id,
                    describe_ports(&internal)
                ))
                .await;
            reporter.succeeded("Opened internal ports").await;
        }

        info!(cluster = %context.cluster_name, platform = %context.platform, "Submariner ports prepared");
        Ok(())
    }

    async fn cleanup_after_submariner(
        &self,
        context: &CloudContext,
        reporter: &dyn StatusReporter,
    ) -> Result<(), Error> {
        reporter
            .start(&format!("Revoking Submariner ports for {}", context.infra_id))
            .await;
        reporter.succeeded("Revoked Submariner ports").await;
        info!(cluster = %context.cluster_name, platform = %context.platform, "Submariner ports cleaned up");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;
    use crate::ports::submariner_ports;
    use crate::reporter::tests::RecordingReporter;
    use submariner_addon_common::crd::SubmarinerConfigSpec;

    fn context() -> CloudContext {
        CloudContext {
            platform: Platform::Aws,
            cluster_name: "cluster1".to_string(),
            region: "us-east-1".to_string(),
            infra_id: "cluster1-x7k2p".to_string(),
        }
    }

    #[tokio::test]
    async fn prepare_reports_external_and_internal_openings() {
        let reporter = RecordingReporter::default();
        let ports = submariner_ports(&SubmarinerConfigSpec::default());

        ReportingCloudApi::new()
            .prepare_for_submariner(&context(), &ports, &reporter)
            .await
            .unwrap();

        let messages = reporter.messages.lock().unwrap();
        assert_eq!(messages.len(), 4);
        assert!(messages[0].starts_with("start: Opening gateway ports for cluster1-x7k2p"));
        assert!(messages[0].contains("UDP/4500 (IPsec NAT-T)"));
        assert!(messages[2].contains("UDP/4800 (route agent VXLAN)"));
        assert!(!messages[0].contains("4800"));
    }

    #[tokio::test]
    async fn prepare_without_ports_reports_nothing() {
        let reporter = RecordingReporter::default();
        ReportingCloudApi::new()
            .prepare_for_submariner(&context(), &[], &reporter)
            .await
            .unwrap();
        assert!(reporter.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cleanup_reports_revocation() {
        let reporter = RecordingReporter::default();
        ReportingCloudApi::new()
            .cleanup_after_submariner(&context(), &reporter)
            .await
            .unwrap();
        let messages = reporter.messages.lock().unwrap();
        assert_eq!(messages[0], "start: Revoking Submariner ports for cluster1-x7k2p");
    }
}
