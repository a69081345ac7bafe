//! Hub controllers of the Submariner addon
//!
//! - `broker`: one broker namespace, its RBAC and IPsec PSK per ManagedClusterSet
//! - `broker_crds`: the CRDs clusters sync through the broker, tied to the ClusterManager
//! - `agent`: per-cluster RBAC, cloud preparation and the operator ManifestWorks
//!
//! The binary wires these into `kube::runtime::Controller`s.

#![deny(missing_docs)]

pub mod agent;
pub mod assets;
pub mod broker;
pub mod broker_crds;
pub mod secrets;

pub use agent::{AgentContext, AgentSettings, CLUSTER_AGENT_FINALIZER};
pub use broker::{BrokerContext, BROKER_FINALIZER};
pub use broker_crds::{BrokerCrdsContext, CRDS_FINALIZER};
pub use secrets::{KubeSecretClient, SecretClient};
