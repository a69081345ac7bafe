//! SubmarinerDiagnoseConfig: on-demand diagnostics requested from the hub

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Condition: the requested checks have run
pub const CONDITION_DIAGNOSE_COMPLETED: &str = "SubmarinerDiagnoseCompleted";

/// Which checks to run
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "submarineraddon.open-cluster-management.io",
    version = "v1alpha1",
    kind = "SubmarinerDiagnoseConfig",
    namespaced,
    status = "SubmarinerDiagnoseStatus",
    shortname = "subdiag"
)]
#[serde(rename_all = "camelCase")]
pub struct SubmarinerDiagnoseSpec {
    /// Run every check
    #[serde(default)]
    pub all: bool,
    /// Check the Kubernetes version is supported
    #[serde(default)]
    pub k8s_version: bool,
    /// Check the CNI is supported
    #[serde(default, rename = "cni")]
    pub cni: bool,
    /// Check gateway connections
    #[serde(default)]
    pub connections: bool,
    /// Check Submariner components are deployed
    #[serde(default)]
    pub deployment: bool,
    /// Check kube-proxy runs in a supported mode
    #[serde(default)]
    pub kube_proxy_mode: bool,
    /// Check firewall openings
    #[serde(default)]
    pub firewall: bool,
}

impl SubmarinerDiagnoseSpec {
    /// Checks selected by this spec, `all` expanded
    pub fn selected(&self) -> Vec<DiagnoseCheck> {
        DiagnoseCheck::ALL
            .into_iter()
            .filter(|check| self.all || self.flag(*check))
            .collect()
    }

    fn flag(&self, check: DiagnoseCheck) -> bool {
        match check {
            DiagnoseCheck::K8sVersion => self.k8s_version,
            DiagnoseCheck::Cni => self.cni,
            DiagnoseCheck::Connections => self.connections,
            DiagnoseCheck::Deployment => self.deployment,
            DiagnoseCheck::KubeProxyMode => self.kube_proxy_mode,
            DiagnoseCheck::Firewall => self.firewall,
        }
    }
}

/// One diagnostic check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiagnoseCheck {
    /// Kubernetes version
    K8sVersion,
    /// CNI detection
    Cni,
    /// Gateway connections
    Connections,
    /// Component deployment
    Deployment,
    /// kube-proxy mode
    KubeProxyMode,
    /// Firewall openings
    Firewall,
}

impl DiagnoseCheck {
    /// Every check in reporting order
    pub const ALL: [DiagnoseCheck; 6] = [
        DiagnoseCheck::K8sVersion,
        DiagnoseCheck::Cni,
        DiagnoseCheck::Connections,
        DiagnoseCheck::Deployment,
        DiagnoseCheck::KubeProxyMode,
        DiagnoseCheck::Firewall,
    ];
}

impl std::fmt::Display for DiagnoseCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::K8sVersion => "k8sVersion",
            Self::Cni => "cni",
            Self::Connections => "connections",
            Self::Deployment => "deployment",
            Self::KubeProxyMode => "kubeProxyMode",
            Self::Firewall => "firewall",
        };
        f.write_str(name)
    }
}

/// Outcome of a single check
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum DiagnoseOutcome {
    /// Check passed
    Success,
    /// Check found a problem
    Failure,
    /// Check was requested but could not run
    #[default]
    Skipped,
}

/// Result of a single check
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct DiagnoseResult {
    /// Outcome
    pub status: DiagnoseOutcome,
    /// Details
    #[serde(default)]
    pub message: String,
}

impl DiagnoseResult {
    /// Passed check
    pub fn success(message: impl Into<String>) -> Self {
        Self { status: DiagnoseOutcome::Success, message: message.into() }
    }

    /// Failed check
    pub fn failure(message: impl Into<String>) -> Self {
        Self { status: DiagnoseOutcome::Failure, message: message.into() }
    }

    /// Check that could not run
    pub fn skipped(message: impl Into<String>) -> Self {
        Self { status: DiagnoseOutcome::Skipped, message: message.into() }
    }
}

/// Diagnose results, one field per check
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmarinerDiagnoseStatus {
    /// Current conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Kubernetes version check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s_version: Option<DiagnoseResult>,
    /// CNI check
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "cni")]
    pub cni: Option<DiagnoseResult>,
    /// Connections check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<DiagnoseResult>,
    /// Deployment check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DiagnoseResult>,
    /// kube-proxy mode check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_proxy_mode: Option<DiagnoseResult>,
    /// Firewall check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firewall: Option<DiagnoseResult>,
}

impl SubmarinerDiagnoseStatus {
    /// Store the result of `check`
    pub fn set_result(&mut self, check: DiagnoseCheck, result: DiagnoseResult) {
        let slot = match check {
            DiagnoseCheck::K8sVersion => &mut self.k8s_version,
            DiagnoseCheck::Cni => &mut self.cni,
            DiagnoseCheck::Connections => &mut self.connections,
            DiagnoseCheck::Deployment => &mut self.deployment,
            DiagnoseCheck::KubeProxyMode => &mut self.kube_proxy_mode,
            DiagnoseCheck::Firewall => &mut self.firewall,
        };
        *slot = Some(result);
    }
}
