//! Red Hat OpenStack

use serde_json::{json, Value};
use submariner_addon_common::Error;

use crate::api::CloudContext;
use crate::credentials::RhosCredentials;
use crate::provider::{CloudEnv, GatewayMachines, Provider, ProviderInfo};

/// OpenStack gateway machines on the cluster network
pub struct RhosMachines {
    credentials: RhosCredentials,
}

impl GatewayMachines for RhosMachines {
    fn account(&self) -> &str {
        &self.credentials.cloud
    }

    fn provider_spec(&self, context: &CloudContext, instance_type: &str, zone: &str) -> Value {
        let infra = &context.infra_id;
        json!({
            "apiVersion": "openstackproviderconfig.openshift.io/v1alpha1",
            "kind": "OpenstackProviderSpec",
            "flavor": instance_type,
            "availabilityZone": zone,
            "cloudName": self.credentials.cloud,
            "cloudsSecret": {"name": "openstack-cloud-credentials", "namespace": "openshift-machine-api"},
            "image": format!("{infra}-rhcos"),
            "networks": [{
                "filter": {},
                "subnets": [{"filter": {"name": format!("{infra}-nodes")}}],
            }],
            "securityGroups": [
                {"name": format!("{infra}-worker")},
                {"name": format!("{infra}-submariner-gw-sg")},
            ],
            "serverMetadata": {"Name": format!("{infra}-worker"), "openshiftClusterID": infra},
            "tags": [format!("openshiftClusterID={infra}")],
            "trunk": true,
            "userDataSecret": {"name": "worker-user-data"},
        })
    }
}

/// Build the OpenStack provider; fails when clouds.yaml lacks the selected cloud
pub fn new_provider(info: ProviderInfo) -> Result<Box<dyn Provider>, Error> {
    let credentials = RhosCredentials::from_secret(&info.credentials)?;
    Ok(Box::new(CloudEnv::new(info, RhosMachines { credentials })))
}
