//! Amazon Web Services

use serde_json::{json, Value};
use submariner_addon_common::Error;

use crate::api::CloudContext;
use crate::credentials::AwsCredentials;
use crate::provider::{CloudEnv, GatewayMachines, Provider, ProviderInfo};

/// Secret the machine API uses on AWS clusters
const MACHINE_CREDENTIALS_SECRET: &str = "aws-cloud-credentials";

/// AWS gateway machines in the cluster's public subnets
pub struct AwsMachines {
    credentials: AwsCredentials,
}

impl GatewayMachines for AwsMachines {
    fn account(&self) -> &str {
        &self.credentials.access_key_id
    }

    fn provider_spec(&self, context: &CloudContext, instance_type: &str, zone: &str) -> Value {
        let infra = &context.infra_id;
        json!({
            "apiVersion": "awsproviderconfig.openshift.io/v1beta1",
            "kind": "AWSMachineProviderConfig",
            "instanceType": instance_type,
            "placement": {
                "availabilityZone": zone,
                "region": context.region,
            },
            "credentialsSecret": {"name": MACHINE_CREDENTIALS_SECRET},
            "iamInstanceProfile": {"id": format!("{infra}-worker-profile")},
            "publicIp": true,
            "securityGroups": [{
                "filters": [{
                    "name": "tag:Name",
                    "values": [format!("{infra}-worker-sg"), format!("{infra}-submariner-gw-sg")],
                }],
            }],
            "subnet": {
                "filters": [{
                    "name": "tag:Name",
                    "values": [format!("{infra}-public-{zone}")],
                }],
            },
            "tags": [{"name": format!("kubernetes.io/cluster/{infra}"), "value": "owned"}],
            "userDataSecret": {"name": "worker-user-data"},
        })
    }
}

/// Build the AWS provider; fails when the access keys are missing
pub fn new_provider(info: ProviderInfo) -> Result<Box<dyn Provider>, Error> {
    let credentials = AwsCredentials::from_secret(&info.credentials)?;
    Ok(Box::new(CloudEnv::new(info, AwsMachines { credentials })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::tests::secret;
    use crate::credentials::{AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY};
    use crate::platform::Platform;
    use crate::provider::tests::{info, FakeCloud, FakeGateways};
    use std::sync::Arc;

    #[tokio::test]
    async fn gateways_land_in_public_subnets() {
        let gateways = Arc::new(FakeGateways::default());
        let info = info(
            Platform::Aws,
            secret(&[(AWS_ACCESS_KEY_ID, "AKIA"), (AWS_SECRET_ACCESS_KEY, "s3cr3t")]),
            Arc::new(FakeCloud::default()),
            gateways.clone(),
        );

        new_provider(info)
            .unwrap()
            .prepare_submariner_cluster_env()
            .await
            .unwrap();

        let inputs = gateways.inputs.lock().unwrap();
        let spec = &inputs[0].placements[0].provider_spec;
        assert_eq!(spec["kind"], "AWSMachineProviderConfig");
        assert_eq!(spec["instanceType"], "c5d.large");
        assert_eq!(spec["placement"]["availabilityZone"], "us-east-1a");
        assert_eq!(
            spec["subnet"]["filters"][0]["values"][0],
            "cluster1-x7k2p-public-us-east-1a"
        );
    }

    #[test]
    fn missing_keys_fail_construction() {
        let info = info(
            Platform::Aws,
            secret(&[(AWS_ACCESS_KEY_ID, "AKIA")]),
            Arc::new(FakeCloud::default()),
            Arc::new(FakeGateways::default()),
        );
        assert!(matches!(new_provider(info), Err(Error::Validation { .. })));
    }
}
