//! Cloud credentials read from the SubmarinerConfig's credentials secret
//!
//! Every missing or malformed key is a validation error: the reconcile
//! fails fast and waits for the user to fix the secret.

use std::fmt;

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use serde::Deserialize;
use submariner_addon_common::yaml::parse_document;
use submariner_addon_common::Error;

/// AWS access key id
pub const AWS_ACCESS_KEY_ID: &str = "aws_access_key_id";
/// AWS secret access key
pub const AWS_SECRET_ACCESS_KEY: &str = "aws_secret_access_key";
/// Azure service principal JSON
pub const AZURE_SERVICE_PRINCIPAL: &str = "osServicePrincipal.json";
/// GCP service account JSON
pub const GCP_SERVICE_ACCOUNT: &str = "osServiceAccount.json";
/// OpenStack clouds.yaml
pub const RHOS_CLOUDS_YAML: &str = "clouds.yaml";
/// Name of the cloud inside clouds.yaml
pub const RHOS_CLOUD: &str = "cloud";
/// Cloud used when the secret has no `cloud` key
pub const RHOS_DEFAULT_CLOUD: &str = "openstack";

/// String value of `key`, from `data` or `stringData`
pub fn secret_value(secret: &Secret, key: &str) -> Result<String, Error> {
    let raw = secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| v.0.clone())
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|d| d.get(key))
                .map(|v| v.clone().into_bytes())
        });

    let Some(bytes) = raw else {
        return Err(Error::validation_for_field(
            secret_name(secret),
            key,
            format!("credentials secret is missing key {key}"),
        ));
    };

    String::from_utf8(bytes).map_err(|_| {
        Error::validation_for_field(
            secret_name(secret),
            key,
            format!("key {key} is not valid UTF-8"),
        )
    })
}

fn optional_value(secret: &Secret, key: &str) -> Option<String> {
    secret_value(secret, key).ok().filter(|v| !v.is_empty())
}

fn secret_name(secret: &Secret) -> String {
    format!(
        "{}/{}",
        secret.namespace().unwrap_or_default(),
        secret.name_any()
    )
}

fn required(secret: &Secret, key: &str, value: String) -> Result<String, Error> {
    if value.trim().is_empty() {
        return Err(Error::validation_for_field(
            secret_name(secret),
            key,
            format!("{key} is empty"),
        ));
    }
    Ok(value)
}

/// AWS static credentials
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    /// Access key id
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
}

impl AwsCredentials {
    /// Read from a credentials secret
    pub fn from_secret(secret: &Secret) -> Result<Self, Error> {
        Ok(Self {
            access_key_id: required(
                secret,
                AWS_ACCESS_KEY_ID,
                secret_value(secret, AWS_ACCESS_KEY_ID)?,
            )?,
            secret_access_key: required(
                secret,
                AWS_SECRET_ACCESS_KEY,
                secret_value(secret, AWS_SECRET_ACCESS_KEY)?,
            )?,
        })
    }
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Azure service principal
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureCredentials {
    /// Application (client) id
    #[serde(default)]
    pub client_id: String,
    /// Client secret
    #[serde(default)]
    pub client_secret: String,
    /// Directory (tenant) id
    #[serde(default)]
    pub tenant_id: String,
    /// Subscription id
    #[serde(default)]
    pub subscription_id: String,
}

impl AzureCredentials {
    /// Read from a credentials secret
    pub fn from_secret(secret: &Secret) -> Result<Self, Error> {
        let raw = secret_value(secret, AZURE_SERVICE_PRINCIPAL)?;
        let creds: Self = serde_json::from_str(&raw).map_err(|e| {
            Error::validation_for_field(
                secret_name(secret),
                AZURE_SERVICE_PRINCIPAL,
                format!("invalid {AZURE_SERVICE_PRINCIPAL}: {e}"),
            )
        })?;

        for (field, value) in [
            ("clientId", &creds.client_id),
            ("clientSecret", &creds.client_secret),
            ("tenantId", &creds.tenant_id),
            ("subscriptionId", &creds.subscription_id),
        ] {
            if value.is_empty() {
                return Err(Error::validation_for_field(
                    secret_name(secret),
                    AZURE_SERVICE_PRINCIPAL,
                    format!("{AZURE_SERVICE_PRINCIPAL} is missing {field}"),
                ));
            }
        }
        Ok(creds)
    }
}

impl fmt::Debug for AzureCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .field("subscription_id", &self.subscription_id)
            .finish()
    }
}

/// GCP service account
#[derive(Clone, PartialEq)]
pub struct GcpCredentials {
    /// Project the cluster runs in
    pub project_id: String,
    /// Service account e-mail, when present
    pub client_email: Option<String>,
    /// The full key document
    pub service_account_json: serde_json::Value,
}

impl GcpCredentials {
    /// Read from a credentials secret
    pub fn from_secret(secret: &Secret) -> Result<Self, Error> {
        let raw = secret_value(secret, GCP_SERVICE_ACCOUNT)?;
        let doc: serde_json::Value = serde_json::from_str(&raw).map_err(|e| {
            Error::validation_for_field(
                secret_name(secret),
                GCP_SERVICE_ACCOUNT,
                format!("invalid {GCP_SERVICE_ACCOUNT}: {e}"),
            )
        })?;

        let project_id = doc
            .get("project_id")
            .and_then(|v| v.as_str())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                Error::validation_for_field(
                    secret_name(secret),
                    GCP_SERVICE_ACCOUNT,
                    format!("{GCP_SERVICE_ACCOUNT} is missing project_id"),
                )
            })?
            .to_string();

        Ok(Self {
            project_id,
            client_email: doc
                .get("client_email")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            service_account_json: doc,
        })
    }
}

impl fmt::Debug for GcpCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcpCredentials")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}

/// OpenStack clouds.yaml plus the selected cloud
#[derive(Clone, PartialEq)]
pub struct RhosCredentials {
    /// Cloud entry name
    pub cloud: String,
    /// The selected `clouds.<cloud>` entry
    pub cloud_config: serde_json::Value,
}

impl RhosCredentials {
    /// Read from a credentials secret
    pub fn from_secret(secret: &Secret) -> Result<Self, Error> {
        let raw = secret_value(secret, RHOS_CLOUDS_YAML)?;
        let cloud =
            optional_value(secret, RHOS_CLOUD).unwrap_or_else(|| RHOS_DEFAULT_CLOUD.to_string());

        let doc = parse_document(&raw).map_err(|e| {
            Error::validation_for_field(
                secret_name(secret),
                RHOS_CLOUDS_YAML,
                format!("invalid {RHOS_CLOUDS_YAML}: {e}"),
            )
        })?;

        let cloud_config = doc
            .get("clouds")
            .and_then(|c| c.get(&cloud))
            .cloned()
            .ok_or_else(|| {
                Error::validation_for_field(
                    secret_name(secret),
                    RHOS_CLOUDS_YAML,
                    format!("{RHOS_CLOUDS_YAML} has no cloud named {cloud}"),
                )
            })?;

        Ok(Self {
            cloud,
            cloud_config,
        })
    }
}

impl fmt::Debug for RhosCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RhosCredentials")
            .field("cloud", &self.cloud)
            .finish_non_exhaustive()
    }
}
