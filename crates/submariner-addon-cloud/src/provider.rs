//! Cloud providers and the registry the hub looks them up in

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, Secret};
use kube::runtime::events::EventType;
use serde_json::Value;
use submariner_addon_common::crd::{ManagedClusterInfo, SubmarinerConfigSpec};
use submariner_addon_common::events::{actions, reasons, EventPublisher};
use submariner_addon_common::metrics::record_cloud_operation;
use submariner_addon_common::Error;
use tracing::{debug, info, instrument, warn};

use crate::api::{
    spread_across_zones, CloudContext, CloudPrepare, GatewayDeployInput, GatewayDeployer,
    GatewayPlacement,
};
use crate::platform::Platform;
use crate::ports::submariner_ports;
use crate::reporter::EventStatusReporter;
use crate::{aws, azure, gcp, rhos};

/// Inputs a provider is built from
#[derive(Clone)]
pub struct ProviderInfo {
    /// Managed cluster name
    pub cluster_name: String,
    /// Platform of the cluster
    pub platform: Platform,
    /// SubmarinerConfig spec
    pub config: SubmarinerConfigSpec,
    /// Facts recorded on the SubmarinerConfig status
    pub cluster_info: ManagedClusterInfo,
    /// Cloud credentials secret
    pub credentials: Secret,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Object events are attached to (the SubmarinerConfig)
    pub regarding: ObjectReference,
    /// Firewall backend
    pub cloud: Arc<dyn CloudPrepare>,
    /// Gateway instance backend
    pub gateways: Arc<dyn GatewayDeployer>,
}

impl fmt::Debug for ProviderInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderInfo")
            .field("cluster_name", &self.cluster_name)
            .field("platform", &self.platform)
            .field("cluster_info", &self.cluster_info)
            .field("credentials", &self.credentials.metadata.name)
            .finish_non_exhaustive()
    }
}

/// Prepares and cleans a cluster's cloud environment for Submariner
#[async_trait]
pub trait Provider: Send + Sync {
    /// Platform served by this provider
    fn platform(&self) -> Platform;

    /// Open Submariner ports and deploy dedicated gateways
    async fn prepare_submariner_cluster_env(&self) -> Result<(), Error>;

    /// Remove gateways and close the ports again
    async fn cleanup_submariner_cluster_env(&self) -> Result<(), Error>;
}

/// Builds a provider, validating credentials
pub type ProviderFactory = fn(ProviderInfo) -> Result<Box<dyn Provider>, Error>;

/// Platform to provider factory table
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<Platform, ProviderFactory>,
}

impl ProviderRegistry {
    /// Registry without any provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in provider
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Platform::Aws, aws::new_provider);
        registry.register(Platform::Azure, azure::new_provider);
        registry.register(Platform::Gcp, gcp::new_provider);
        registry.register(Platform::Rhos, rhos::new_provider);
        registry
    }

    /// Register or replace the factory for `platform`
    pub fn register(&mut self, platform: Platform, factory: ProviderFactory) {
        self.factories.insert(platform, factory);
    }

    /// Whether `platform` has a provider
    pub fn supports(&self, platform: Platform) -> bool {
        self.factories.contains_key(&platform)
    }

    /// Build the provider for `info.platform`; `Ok(None)` when none is registered
    pub fn get(&self, info: ProviderInfo) -> Result<Option<Box<dyn Provider>>, Error> {
        match self.factories.get(&info.platform) {
            Some(factory) => factory(info).map(Some),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

/// Platform-specific gateway machine details
pub trait GatewayMachines: Send + Sync {
    /// Non-secret account identity for logs (key id, subscription, project, cloud)
    fn account(&self) -> &str;

    /// Instance type from the config, or the platform default
    fn instance_type(&self, platform: Platform, config: &SubmarinerConfigSpec) -> String {
        let configured = match platform {
            Platform::Aws => &config.gateway_config.aws,
            Platform::Azure => &config.gateway_config.azure,
            Platform::Gcp => &config.gateway_config.gcp,
            Platform::Rhos => &config.gateway_config.rhos,
        };
        configured
            .instance_type
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| platform.default_instance_type().to_string())
    }

    /// MachineSet providerSpec for one zone
    fn provider_spec(&self, context: &CloudContext, instance_type: &str, zone: &str) -> Value;
}

/// Provider shared by every platform; machine details come from `M`
pub struct CloudEnv<M> {
    info: ProviderInfo,
    machines: M,
}

impl<M: GatewayMachines> CloudEnv<M> {
    /// Combine provider inputs with platform machine details
    pub fn new(info: ProviderInfo, machines: M) -> Self {
        Self { info, machines }
    }

    fn context(&self) -> Result<CloudContext, Error> {
        let info = &self.info.cluster_info;
        let resource = format!("{}/submariner", self.info.cluster_name);
        if info.region.is_empty() {
            return Err(Error::validation_for_field(
                resource,
                "status.managedClusterInfo.region",
                "cluster region is unknown",
            ));
        }
        if info.infra_id.is_empty() {
            return Err(Error::validation_for_field(
                resource,
                "status.managedClusterInfo.infraId",
                "cluster infrastructure id is unknown",
            ));
        }
        Ok(CloudContext {
            platform: self.info.platform,
            cluster_name: self.info.cluster_name.clone(),
            region: info.region.clone(),
            infra_id: info.infra_id.clone(),
        })
    }

    fn reporter(&self) -> EventStatusReporter {
        EventStatusReporter::new(
            self.info.events.clone(),
            self.info.regarding.clone(),
            self.info.cluster_name.clone(),
            self.info.platform,
        )
    }

    /// Worker zones reported by the agent, else the platform's usual names
    fn zones(&self, context: &CloudContext) -> Vec<String> {
        let reported = &self.info.cluster_info.zones;
        if reported.is_empty() {
            debug!(region = %context.region, "No worker zones reported, using default zone names");
            self.info.platform.default_zones(&context.region)
        } else {
            reported.clone()
        }
    }

    fn deploy_input(&self, context: &CloudContext) -> GatewayDeployInput {
        let instance_type = self
            .machines
            .instance_type(self.info.platform, &self.info.config);
        let gateways = self.info.config.gateway_config.gateways;
        let placements = spread_across_zones(gateways, &self.zones(context))
            .into_iter()
            .map(|(zone, replicas)| GatewayPlacement {
                provider_spec: self.machines.provider_spec(context, &instance_type, &zone),
                zone,
                replicas,
            })
            .collect();
        GatewayDeployInput {
            context: context.clone(),
            instance_type,
            gateways,
            placements,
        }
    }

    async fn finish(&self, operation: &'static str, errors: Vec<Error>) -> Result<(), Error> {
        let result = Error::from_errors(errors);
        record_cloud_operation(&self.info.platform.to_string(), operation, result.is_ok());
        let (type_, reason, action, note) = match (&result, operation) {
            (Ok(()), "prepare") => (
                EventType::Normal,
                reasons::CLOUD_PREPARED,
                actions::PREPARE,
                "Submariner cluster environment prepared".to_string(),
            ),
            (Ok(()), _) => (
                EventType::Normal,
                reasons::CLOUD_CLEANED_UP,
                actions::CLEANUP,
                "Submariner cluster environment cleaned up".to_string(),
            ),
            (Err(e), "prepare") => (
                EventType::Warning,
                reasons::CLOUD_PREPARE_FAILED,
                actions::PREPARE,
                e.to_string(),
            ),
            (Err(e), _) => (
                EventType::Warning,
                reasons::CLOUD_PREPARE_FAILED,
                actions::CLEANUP,
                e.to_string(),
            ),
        };
        self.info
            .events
            .publish(&self.info.regarding, type_, reason, action, Some(note))
            .await;
        result
    }
}

#[async_trait]
impl<M: GatewayMachines> Provider for CloudEnv<M> {
    fn platform(&self) -> Platform {
        self.info.platform
    }

    #[instrument(skip(self), fields(cluster = %self.info.cluster_name, platform = %self.info.platform))]
    async fn prepare_submariner_cluster_env(&self) -> Result<(), Error> {
        let context = self.context()?;
        let reporter = self.reporter();
        info!(account = %self.machines.account(), infra_id = %context.infra_id, "Preparing Submariner cluster environment");

        let mut errors = Vec::new();
        let ports = submariner_ports(&self.info.config);
        if let Err(e) = self
            .info
            .cloud
            .prepare_for_submariner(&context, &ports, &reporter)
            .await
        {
            warn!(error = %e, "Failed to open Submariner ports");
            errors.push(e);
        }

        let input = self.deploy_input(&context);
        if let Err(e) = self.info.gateways.deploy(&input, &reporter).await {
            warn!(error = %e, "Failed to deploy gateways");
            errors.push(e);
        }

        self.finish("prepare", errors).await
    }

    #[instrument(skip(self), fields(cluster = %self.info.cluster_name, platform = %self.info.platform))]
    async fn cleanup_submariner_cluster_env(&self) -> Result<(), Error> {
        let context = self.context()?;
        let reporter = self.reporter();
        info!(account = %self.machines.account(), infra_id = %context.infra_id, "Cleaning up Submariner cluster environment");

        let mut errors = Vec::new();
        if let Err(e) = self.info.gateways.cleanup(&context, &reporter).await {
            warn!(error = %e, "Failed to remove gateways");
            errors.push(e);
        }
        if let Err(e) = self
            .info
            .cloud
            .cleanup_after_submariner(&context, &reporter)
            .await
        {
            warn!(error = %e, "Failed to close Submariner ports");
            errors.push(e);
        }

        self.finish("cleanup", errors).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::StatusReporter;
    use crate::ports::PortSpec;
    use std::sync::Mutex;
    use submariner_addon_common::events::NoopEventPublisher;

    /// Records calls and optionally fails them
    #[derive(Default)]
    pub(crate) struct FakeCloud {
        pub(crate) calls: Mutex<Vec<String>>,
        pub(crate) fail: bool,
    }

    #[async_trait]
    impl CloudPrepare for FakeCloud {
        async fn prepare_for_submariner(
            &self,
            context: &CloudContext,
            ports: &[PortSpec],
            _reporter: &dyn StatusReporter,
        ) -> Result<(), Error> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("prepare {} {}", context.infra_id, ports.len()));
            if self.fail {
                return Err(Error::provider_for(&context.cluster_name, "AWS", "security group quota"));
            }
            Ok(())
        }

        async fn cleanup_after_submariner(
            &self,
            context: &CloudContext,
            _reporter: &dyn StatusReporter,
        ) -> Result<(), Error> {
            self.calls.lock().unwrap().push(format!("cleanup {}", context.infra_id));
            Ok(())
        }
    }

    /// Records gateway deployments and optionally fails them
    #[derive(Default)]
    pub(crate) struct FakeGateways {
        pub(crate) inputs: Mutex<Vec<GatewayDeployInput>>,
        pub(crate) cleanups: Mutex<u32>,
        pub(crate) fail: bool,
    }

    #[async_trait]
    impl GatewayDeployer for FakeGateways {
        async fn deploy(
            &self,
            input: &GatewayDeployInput,
            _reporter: &dyn StatusReporter,
        ) -> Result<(), Error> {
            self.inputs.lock().unwrap().push(input.clone());
            if self.fail {
                return Err(Error::internal_with_context("gateways", "work rejected"));
            }
            Ok(())
        }

        async fn cleanup(
            &self,
            _context: &CloudContext,
            _reporter: &dyn StatusReporter,
        ) -> Result<(), Error> {
            *self.cleanups.lock().unwrap() += 1;
            Ok(())
        }
    }

    pub(crate) fn cluster_info(platform: &str, region: &str) -> ManagedClusterInfo {
        ManagedClusterInfo {
            cluster_name: "cluster1".to_string(),
            vendor: "OpenShift".to_string(),
            platform: platform.to_string(),
            region: region.to_string(),
            infra_id: "cluster1-x7k2p".to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn info(
        platform: Platform,
        credentials: Secret,
        cloud: Arc<FakeCloud>,
        gateways: Arc<FakeGateways>,
    ) -> ProviderInfo {
        ProviderInfo {
            cluster_name: "cluster1".to_string(),
            platform,
            config: SubmarinerConfigSpec::default(),
            cluster_info: cluster_info(&platform.to_string(), "us-east-1"),
            credentials,
            events: Arc::new(NoopEventPublisher),
            regarding: ObjectReference::default(),
            cloud,
            gateways,
        }
    }

    struct StaticMachines;

    impl GatewayMachines for StaticMachines {
        fn account(&self) -> &str {
            "test"
        }

        fn provider_spec(&self, _context: &CloudContext, instance_type: &str, zone: &str) -> Value {
            serde_json::json!({"instanceType": instance_type, "zone": zone})
        }
    }

    fn static_provider(info: ProviderInfo) -> Result<Box<dyn Provider>, Error> {
        Ok(Box::new(CloudEnv::new(info, StaticMachines)))
    }

    #[test]
    fn unregistered_platform_yields_none() {
        let registry = ProviderRegistry::new();
        let info = info(
            Platform::Aws,
            Secret::default(),
            Arc::new(FakeCloud::default()),
            Arc::new(FakeGateways::default()),
        );
        assert!(registry.get(info).unwrap().is_none());
    }

    #[test]
    fn defaults_cover_every_platform() {
        let registry = ProviderRegistry::with_defaults();
        for platform in Platform::ALL {
            assert!(registry.supports(platform));
        }
    }

    #[test]
    fn factory_errors_are_returned() {
        let registry = ProviderRegistry::with_defaults();
        let info = info(
            Platform::Aws,
            Secret::default(),
            Arc::new(FakeCloud::default()),
            Arc::new(FakeGateways::default()),
        );
        let err = registry.get(info).err().expect("missing credentials");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn prepare_opens_ports_then_deploys_gateways() {
        let cloud = Arc::new(FakeCloud::default());
        let gateways = Arc::new(FakeGateways::default());
        let mut registry = ProviderRegistry::new();
        registry.register(Platform::Aws, static_provider);

        let mut info = info(Platform::Aws, Secret::default(), cloud.clone(), gateways.clone());
        info.config.gateway_config.gateways = 2;
        let provider = registry.get(info).unwrap().unwrap();
        provider.prepare_submariner_cluster_env().await.unwrap();

        assert_eq!(*cloud.calls.lock().unwrap(), vec!["prepare cluster1-x7k2p 8"]);
        let inputs = gateways.inputs.lock().unwrap();
        assert_eq!(inputs[0].instance_type, "c5d.large");
        assert_eq!(inputs[0].placements.len(), 2);
        assert_eq!(inputs[0].placements[1].zone, "us-east-1b");
        assert_eq!(inputs[0].placements[1].provider_spec["zone"], "us-east-1b");
    }

    #[tokio::test]
    async fn reported_worker_zones_replace_default_names() {
        let gateways = Arc::new(FakeGateways::default());
        let mut info = info(
            Platform::Aws,
            Secret::default(),
            Arc::new(FakeCloud::default()),
            gateways.clone(),
        );
        info.config.gateway_config.gateways = 2;
        info.cluster_info.zones = vec!["us-east-1d".to_string(), "us-east-1f".to_string()];

        static_provider(info)
            .unwrap()
            .prepare_submariner_cluster_env()
            .await
            .unwrap();

        let inputs = gateways.inputs.lock().unwrap();
        let zones: Vec<&str> = inputs[0].placements.iter().map(|p| p.zone.as_str()).collect();
        assert_eq!(zones, ["us-east-1d", "us-east-1f"]);
    }

    #[tokio::test]
    async fn configured_instance_type_wins() {
        let gateways = Arc::new(FakeGateways::default());
        let mut info = info(
            Platform::Aws,
            Secret::default(),
            Arc::new(FakeCloud::default()),
            gateways.clone(),
        );
        info.config.gateway_config.aws.instance_type = Some("m5n.large".to_string());

        static_provider(info)
            .unwrap()
            .prepare_submariner_cluster_env()
            .await
            .unwrap();
        assert_eq!(gateways.inputs.lock().unwrap()[0].instance_type, "m5n.large");
    }

    #[tokio::test]
    async fn prepare_failures_are_aggregated() {
        let cloud = Arc::new(FakeCloud {
            fail: true,
            ..Default::default()
        });
        let gateways = Arc::new(FakeGateways {
            fail: true,
            ..Default::default()
        });
        let provider = static_provider(info(Platform::Aws, Secret::default(), cloud, gateways.clone()))
            .unwrap();

        let err = provider.prepare_submariner_cluster_env().await.unwrap_err();
        assert!(matches!(err, Error::Aggregate(ref errors) if errors.len() == 2));
        assert!(err.is_retryable());
        assert_eq!(err.to_string().lines().count(), 2);
        assert_eq!(gateways.inputs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_region_is_a_validation_error() {
        let cloud = Arc::new(FakeCloud::default());
        let mut info = info(
            Platform::Aws,
            Secret::default(),
            cloud.clone(),
            Arc::new(FakeGateways::default()),
        );
        info.cluster_info.region.clear();

        let err = static_provider(info)
            .unwrap()
            .prepare_submariner_cluster_env()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(cloud.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cleanup_removes_gateways_then_ports() {
        let cloud = Arc::new(FakeCloud::default());
        let gateways = Arc::new(FakeGateways::default());
        let provider = static_provider(info(
            Platform::Aws,
            Secret::default(),
            cloud.clone(),
            gateways.clone(),
        ))
        .unwrap();

        provider.cleanup_submariner_cluster_env().await.unwrap();
        assert_eq!(*gateways.cleanups.lock().unwrap(), 1);
        assert_eq!(*cloud.calls.lock().unwrap(), vec!["cleanup cluster1-x7k2p"]);
    }
}
