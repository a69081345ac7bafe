//! Common types for the Submariner addon: CRDs, errors, status and
//! finalizer helpers, the manifest pipeline and observability setup

#![deny(missing_docs)]

pub mod conditions;
pub mod controller;
pub mod crd;
pub mod error;
pub mod events;
pub mod finalizer;
pub mod kube_utils;
pub mod leader_election;
pub mod manifests;
pub mod metrics;
pub mod redact;
pub mod retry;
pub mod status;
pub mod telemetry;
pub mod work;
pub mod yaml;

pub use error::{Error, ManifestError};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label marking a node as a Submariner gateway
pub const GATEWAY_LABEL: &str = "submariner.io/gateway";

/// Namespace the Submariner operator is installed into on managed clusters
pub const DEFAULT_INSTALL_NAMESPACE: &str = "submariner-operator";

/// Suffix appended to a cluster set name to form its broker namespace
pub const BROKER_NAMESPACE_SUFFIX: &str = "-broker";

/// Broker namespace for a cluster set
pub fn broker_namespace(cluster_set: &str) -> String {
    format!("{cluster_set}{BROKER_NAMESPACE_SUFFIX}")
}
