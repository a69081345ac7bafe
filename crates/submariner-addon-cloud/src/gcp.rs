//! Google Cloud Platform

use serde_json::{json, Value};
use submariner_addon_common::Error;

use crate::api::CloudContext;
use crate::credentials::GcpCredentials;
use crate::provider::{CloudEnv, GatewayMachines, Provider, ProviderInfo};

/// GCP gateway machines tagged for the Submariner firewall rules
pub struct GcpMachines {
    credentials: GcpCredentials,
}

impl GatewayMachines for GcpMachines {
    fn account(&self) -> &str {
        &self.credentials.project_id
    }

    fn provider_spec(&self, context: &CloudContext, instance_type: &str, zone: &str) -> Value {
        let infra = &context.infra_id;
        let service_accounts: Vec<Value> = self
            .credentials
            .client_email
            .iter()
            .map(|email| {
                json!({
                    "email": email,
                    "scopes": ["https://www.googleapis.com/auth/cloud-platform"],
                })
            })
            .collect();
        json!({
            "apiVersion": "gcpprovider.openshift.io/v1beta1",
            "kind": "GCPMachineProviderSpec",
            "machineType": instance_type,
            "projectID": self.credentials.project_id,
            "region": context.region,
            "zone": zone,
            "canIPForward": true,
            "disks": [{
                "autoDelete": true,
                "boot": true,
                "image": format!("{infra}-rhcos-image"),
                "sizeGb": 128,
                "type": "pd-ssd",
            }],
            "networkInterfaces": [{
                "network": format!("{infra}-network"),
                "subnetwork": format!("{infra}-worker-subnet"),
                "publicIP": true,
            }],
            "serviceAccounts": service_accounts,
            "tags": [format!("{infra}-worker"), format!("{infra}-submariner-gw")],
            "credentialsSecret": {"name": "gcp-cloud-credentials"},
            "userDataSecret": {"name": "worker-user-data"},
        })
    }
}

/// Build the GCP provider; fails when the service account has no project
pub fn new_provider(info: ProviderInfo) -> Result<Box<dyn Provider>, Error> {
    let credentials = GcpCredentials::from_secret(&info.credentials)?;
    Ok(Box::new(CloudEnv::new(info, GcpMachines { credentials })))
}
