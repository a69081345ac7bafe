//! OLM Subscription, used to install the Submariner operator

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the operator package and its Subscription
pub const SUBMARINER_PACKAGE: &str = "submariner";

/// Subscription spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "Subscription",
    namespaced,
    status = "SubscriptionStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    /// Channel
    #[serde(default)]
    pub channel: String,
    /// Package name
    pub name: String,
    /// Catalog source
    #[serde(default)]
    pub source: String,
    /// Catalog source namespace
    #[serde(default)]
    pub source_namespace: String,
    /// Automatic or Manual
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_plan_approval: Option<String>,
    /// Starting CSV
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "startingCSV")]
    pub starting_csv: Option<String>,
}

/// Subscription status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    /// CSV that is installed
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "installedCSV")]
    pub installed_csv: Option<String>,
    /// CSV being installed
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "currentCSV")]
    pub current_csv: Option<String>,
    /// AtLatestKnown, UpgradePending, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}
