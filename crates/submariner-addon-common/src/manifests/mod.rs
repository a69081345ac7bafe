//! Embedded manifest templates: render, decode, apply and delete

mod apply;
mod kinds;
mod render;

pub use apply::{ApplySummary, KubeManifestClient, ManifestApplier, ManifestClient};
#[cfg(any(test, feature = "testing"))]
pub use apply::MockManifestClient;
pub use kinds::Manifest;
pub use render::{decode_manifests, decode_values, Asset, ManifestRenderer};
