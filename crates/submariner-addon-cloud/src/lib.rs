//! Cloud environment preparation for Submariner.
//!
//! A [`ProviderRegistry`] maps each [`Platform`] to a factory that validates
//! the cluster's credentials secret and returns a [`Provider`]. Providers open
//! the Submariner ports through a [`CloudPrepare`] backend and deploy dedicated
//! gateway instances through a [`GatewayDeployer`] (MachineSets by default).

#![deny(missing_docs)]

pub mod api;
pub mod aws;
pub mod azure;
pub mod credentials;
pub mod gcp;
pub mod machineset;
pub mod platform;
pub mod ports;
pub mod provider;
pub mod reporter;
pub mod reporting;
pub mod rhos;

pub use api::{CloudContext, CloudPrepare, GatewayDeployInput, GatewayDeployer, StatusReporter};
pub use machineset::MachineSetDeployer;
pub use platform::Platform;
pub use provider::{Provider, ProviderFactory, ProviderInfo, ProviderRegistry};
pub use reporter::EventStatusReporter;
pub use reporting::ReportingCloudApi;
