//! Gateway instances as OpenShift MachineSets delivered through a ManifestWork

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use serde_json::{json, Value};
use submariner_addon_common::events::EventPublisher;
use submariner_addon_common::work::{
    apply_manifest_work, build_manifest_work, ManifestWorkClient, WorkOutcome,
    GATEWAY_MACHINESETS_WORK_NAME,
};
use submariner_addon_common::{Error, GATEWAY_LABEL};
use tracing::info;

use crate::api::{CloudContext, GatewayDeployInput, GatewayDeployer, GatewayPlacement, StatusReporter};

/// Namespace the machine API operator watches
pub const MACHINE_API_NAMESPACE: &str = "openshift-machine-api";

const CLUSTER_API_CLUSTER_LABEL: &str = "machine.openshift.io/cluster-api-cluster";
const CLUSTER_API_MACHINESET_LABEL: &str = "machine.openshift.io/cluster-api-machineset";
const CLUSTER_API_ROLE_LABEL: &str = "machine.openshift.io/cluster-api-machine-role";
const CLUSTER_API_TYPE_LABEL: &str = "machine.openshift.io/cluster-api-machine-type";
const WORKER_ROLE_LABEL: &str = "node-role.kubernetes.io/worker";

/// Name of the gateway MachineSet for `zone`
pub fn machine_set_name(infra_id: &str, zone: &str) -> String {
    format!("{infra_id}-submariner-gw-{}", zone.to_lowercase())
}

/// MachineSet manifest for one placement
pub fn machine_set(infra_id: &str, placement: &GatewayPlacement) -> Value {
    let name = machine_set_name(infra_id, &placement.zone);
    json!({
        "apiVersion": "machine.openshift.io/v1beta1",
        "kind": "MachineSet",
        "metadata": {
            "name": name,
            "namespace": MACHINE_API_NAMESPACE,
            "labels": {
                CLUSTER_API_CLUSTER_LABEL: infra_id,
            },
        },
        "spec": {
            "replicas": placement.replicas,
            "selector": {
                "matchLabels": {
                    CLUSTER_API_CLUSTER_LABEL: infra_id,
                    CLUSTER_API_MACHINESET_LABEL: name,
                },
            },
            "template": {
                "metadata": {
                    "labels": {
                        CLUSTER_API_CLUSTER_LABEL: infra_id,
                        CLUSTER_API_ROLE_LABEL: "worker",
                        CLUSTER_API_TYPE_LABEL: "worker",
                        CLUSTER_API_MACHINESET_LABEL: name,
                    },
                },
                "spec": {
                    "metadata": {
                        "labels": {
                            GATEWAY_LABEL: "true",
                            WORKER_ROLE_LABEL: "",
                        },
                    },
                    "providerSpec": {
                        "value": placement.provider_spec,
                    },
                },
            },
        },
    })
}

fn cluster_ref(cluster: &str) -> ObjectReference {
    ObjectReference {
        api_version: Some("cluster.open-cluster-management.io/v1".to_string()),
        kind: Some("ManagedCluster".to_string()),
        name: Some(cluster.to_string()),
        ..Default::default()
    }
}

/// Default [`GatewayDeployer`]: one MachineSet per zone
pub struct MachineSetDeployer {
    works: Arc<dyn ManifestWorkClient>,
    events: Arc<dyn EventPublisher>,
}

impl MachineSetDeployer {
    /// Deliver MachineSets through `works`
    pub fn new(works: Arc<dyn ManifestWorkClient>, events: Arc<dyn EventPublisher>) -> Self {
        Self { works, events }
    }
}

#[async_trait]
impl GatewayDeployer for MachineSetDeployer {
    async fn deploy(
        &self,
        input: &GatewayDeployInput,
        reporter: &dyn StatusReporter,
    ) -> Result<(), Error> {
        let context = &input.context;
        if input.placements.is_empty() {
            return self.cleanup(context, reporter).await;
        }

        reporter
            .start(&format!(
                "Deploying {} {} gateway(s) of type {}",
                input.gateways, context.platform, input.instance_type
            ))
            .await;

        let manifests = input
            .placements
            .iter()
            .map(|p| machine_set(&context.infra_id, p))
            .collect();
        let work = build_manifest_work(
            &context.cluster_name,
            GATEWAY_MACHINESETS_WORK_NAME,
            manifests,
        );

        match apply_manifest_work(
            self.works.as_ref(),
            self.events.as_ref(),
            &cluster_ref(&context.cluster_name),
            work,
        )
        .await
        {
            Ok(outcome) => {
                if outcome != WorkOutcome::Unchanged {
                    info!(cluster = %context.cluster_name, ?outcome, "Gateway MachineSets applied");
                }
                reporter.succeeded("Deployed gateway MachineSets").await;
                Ok(())
            }
            Err(e) => {
                reporter.failed(&e).await;
                Err(e)
            }
        }
    }

    async fn cleanup(
        &self,
        context: &CloudContext,
        reporter: &dyn StatusReporter,
    ) -> Result<(), Error> {
        reporter.start("Removing gateway MachineSets").await;
        match self
            .works
            .delete(&context.cluster_name, GATEWAY_MACHINESETS_WORK_NAME)
            .await
        {
            Ok(()) => {
                reporter.succeeded("Removed gateway MachineSets").await;
                Ok(())
            }
            Err(e) => {
                reporter.failed(&e).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::platform::Platform;
    use crate::reporter::tests::RecordingReporter;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use submariner_addon_common::crd::ManifestWork;
    use submariner_addon_common::events::NoopEventPublisher;

    /// In-memory ManifestWork store keyed by namespace/name
    #[derive(Default)]
    pub(crate) struct FakeWorks {
        pub(crate) works: Mutex<BTreeMap<String, ManifestWork>>,
        pub(crate) deletes: Mutex<Vec<String>>,
    }

    fn key(ns: &str, name: &str) -> String {
        format!("{ns}/{name}")
    }

    #[async_trait]
    impl ManifestWorkClient for FakeWorks {
        async fn get(&self, namespace: &str, name: &str) -> Result<Option<ManifestWork>, Error> {
            Ok(self.works.lock().unwrap().get(&key(namespace, name)).cloned())
        }

        async fn create(&self, work: &ManifestWork) -> Result<(), Error> {
            let k = key(
                work.metadata.namespace.as_deref().unwrap_or_default(),
                work.metadata.name.as_deref().unwrap_or_default(),
            );
            self.works.lock().unwrap().insert(k, work.clone());
            Ok(())
        }

        async fn replace(&self, work: &ManifestWork) -> Result<(), Error> {
            self.create(work).await
        }

        async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error> {
            let k = key(namespace, name);
            self.works.lock().unwrap().remove(&k);
            self.deletes.lock().unwrap().push(k);
            Ok(())
        }
    }

    fn context() -> CloudContext {
        CloudContext {
            platform: Platform::Aws,
            cluster_name: "cluster1".to_string(),
            region: "us-east-1".to_string(),
            infra_id: "cluster1-x7k2p".to_string(),
        }
    }

    fn input(zones: &[(&str, u32)]) -> GatewayDeployInput {
        GatewayDeployInput {
            context: context(),
            instance_type: "c5d.large".to_string(),
            gateways: zones.iter().map(|(_, n)| n).sum(),
            placements: zones
                .iter()
                .map(|(zone, replicas)| GatewayPlacement {
                    zone: zone.to_string(),
                    replicas: *replicas,
                    provider_spec: json!({"instanceType": "c5d.large"}),
                })
                .collect(),
        }
    }

    #[test]
    fn machine_set_carries_gateway_label() {
        let placement = GatewayPlacement {
            zone: "us-east-1a".to_string(),
            replicas: 2,
            provider_spec: json!({"kind": "AWSMachineProviderConfig"}),
        };
        let ms = machine_set("infra1", &placement);

        assert_eq!(ms["metadata"]["name"], "infra1-submariner-gw-us-east-1a");
        assert_eq!(ms["metadata"]["namespace"], MACHINE_API_NAMESPACE);
        assert_eq!(ms["spec"]["replicas"], 2);
        assert_eq!(
            ms["spec"]["template"]["spec"]["metadata"]["labels"][GATEWAY_LABEL],
            "true"
        );
        assert_eq!(
            ms["spec"]["selector"]["matchLabels"][CLUSTER_API_MACHINESET_LABEL],
            "infra1-submariner-gw-us-east-1a"
        );
        assert_eq!(
            ms["spec"]["template"]["spec"]["providerSpec"]["value"]["kind"],
            "AWSMachineProviderConfig"
        );
    }

    #[tokio::test]
    async fn deploy_writes_one_machine_set_per_zone() {
        let works = Arc::new(FakeWorks::default());
        let deployer = MachineSetDeployer::new(works.clone(), Arc::new(NoopEventPublisher));
        let reporter = RecordingReporter::default();

        deployer
            .deploy(&input(&[("us-east-1a", 1), ("us-east-1b", 1)]), &reporter)
            .await
            .unwrap();

        let stored = works.works.lock().unwrap();
        let work = stored
            .get(&format!("cluster1/{GATEWAY_MACHINESETS_WORK_NAME}"))
            .expect("work created");
        assert_eq!(work.spec.workload.manifests.len(), 2);
        assert_eq!(
            work.spec.workload.manifests[1]["metadata"]["name"],
            "cluster1-x7k2p-submariner-gw-us-east-1b"
        );
        let messages = reporter.messages.lock().unwrap();
        assert_eq!(messages.last().unwrap(), "ok: Deployed gateway MachineSets");
    }

    #[tokio::test]
    async fn no_placements_removes_the_work() {
        let works = Arc::new(FakeWorks::default());
        let deployer = MachineSetDeployer::new(works.clone(), Arc::new(NoopEventPublisher));

        deployer
            .deploy(&input(&[]), &RecordingReporter::default())
            .await
            .unwrap();

        assert_eq!(
            *works.deletes.lock().unwrap(),
            vec![format!("cluster1/{GATEWAY_MACHINESETS_WORK_NAME}")]
        );
    }
}
