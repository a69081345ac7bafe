//! Microsoft Azure

use serde_json::{json, Value};
use submariner_addon_common::Error;

use crate::api::CloudContext;
use crate::credentials::AzureCredentials;
use crate::provider::{CloudEnv, GatewayMachines, Provider, ProviderInfo};

/// Azure gateway machines with public IPs in the cluster's resource group
pub struct AzureMachines {
    credentials: AzureCredentials,
}

impl GatewayMachines for AzureMachines {
    fn account(&self) -> &str {
        &self.credentials.subscription_id
    }

    fn provider_spec(&self, context: &CloudContext, instance_type: &str, zone: &str) -> Value {
        let infra = &context.infra_id;
        json!({
            "apiVersion": "azureproviderconfig.openshift.io/v1beta1",
            "kind": "AzureMachineProviderSpec",
            "vmSize": instance_type,
            "location": context.region,
            "zone": zone,
            "publicIP": true,
            "resourceGroup": format!("{infra}-rg"),
            "networkResourceGroup": format!("{infra}-rg"),
            "vnet": format!("{infra}-vnet"),
            "subnet": format!("{infra}-worker-subnet"),
            "image": {
                "resourceID": format!(
                    "/subscriptions/{}/resourceGroups/{infra}-rg/providers/Microsoft.Compute/images/{infra}",
                    self.credentials.subscription_id
                ),
            },
            "osDisk": {
                "diskSizeGB": 128,
                "managedDisk": {"storageAccountType": "Premium_LRS"},
                "osType": "Linux",
            },
            "credentialsSecret": {"name": "azure-cloud-credentials", "namespace": "openshift-machine-api"},
            "userDataSecret": {"name": "worker-user-data"},
        })
    }
}

/// Build the Azure provider; fails when the service principal is incomplete
pub fn new_provider(info: ProviderInfo) -> Result<Box<dyn Provider>, Error> {
    let credentials = AzureCredentials::from_secret(&info.credentials)?;
    Ok(Box::new(CloudEnv::new(info, AzureMachines { credentials })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::tests::secret;
    use crate::credentials::AZURE_SERVICE_PRINCIPAL;
    use crate::platform::Platform;
    use crate::provider::tests::{info, FakeCloud, FakeGateways};
    use std::sync::Arc;

    const PRINCIPAL: &str = r#"{"clientId":"id","clientSecret":"pw","tenantId":"t","subscriptionId":"sub-1"}"#;

    #[tokio::test]
    async fn gateways_use_numbered_zones() {
        let gateways = Arc::new(FakeGateways::default());
        let mut info = info(
            Platform::Azure,
            secret(&[(AZURE_SERVICE_PRINCIPAL, PRINCIPAL)]),
            Arc::new(FakeCloud::default()),
            gateways.clone(),
        );
        info.cluster_info.region = "eastus".to_string();
        info.config.gateway_config.gateways = 2;

        new_provider(info)
            .unwrap()
            .prepare_submariner_cluster_env()
            .await
            .unwrap();

        let inputs = gateways.inputs.lock().unwrap();
        assert_eq!(inputs[0].instance_type, "Standard_F4s_v2");
        let spec = &inputs[0].placements[1].provider_spec;
        assert_eq!(spec["zone"], "2");
        assert_eq!(spec["location"], "eastus");
        assert!(spec["image"]["resourceID"]
            .as_str()
            .unwrap()
            .starts_with("/subscriptions/sub-1/"));
    }
}
