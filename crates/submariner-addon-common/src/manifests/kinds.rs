//! The closed set of object kinds the addon applies from templates

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde_json::Value;

use crate::error::ManifestError;
use crate::Error;

/// A decoded manifest
#[derive(Clone, Debug, PartialEq)]
pub enum Manifest {
    /// core/v1 Namespace
    Namespace(Namespace),
    /// core/v1 ServiceAccount
    ServiceAccount(ServiceAccount),
    /// core/v1 Secret
    Secret(Secret),
    /// core/v1 ConfigMap
    ConfigMap(ConfigMap),
    /// rbac/v1 Role
    Role(Role),
    /// rbac/v1 RoleBinding
    RoleBinding(RoleBinding),
    /// rbac/v1 ClusterRole
    ClusterRole(ClusterRole),
    /// rbac/v1 ClusterRoleBinding
    ClusterRoleBinding(ClusterRoleBinding),
    /// apps/v1 Deployment
    Deployment(Deployment),
    /// apps/v1 DaemonSet
    DaemonSet(DaemonSet),
    /// apiextensions/v1 CustomResourceDefinition
    CustomResourceDefinition(CustomResourceDefinition),
}

macro_rules! manifest_from {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Manifest {
                fn from(obj: $variant) -> Self {
                    Manifest::$variant(obj)
                }
            }
        )*
    };
}

manifest_from!(
    Namespace,
    ServiceAccount,
    Secret,
    ConfigMap,
    Role,
    RoleBinding,
    ClusterRole,
    ClusterRoleBinding,
    Deployment,
    DaemonSet,
    CustomResourceDefinition,
);

/// Run `$body` with `$obj` bound to the inner typed object
#[macro_export]
#[doc(hidden)]
macro_rules! each_manifest {
    ($manifest:expr, $obj:ident => $body:expr) => {
        match $manifest {
            $crate::manifests::Manifest::Namespace($obj) => $body,
            $crate::manifests::Manifest::ServiceAccount($obj) => $body,
            $crate::manifests::Manifest::Secret($obj) => $body,
            $crate::manifests::Manifest::ConfigMap($obj) => $body,
            $crate::manifests::Manifest::Role($obj) => $body,
            $crate::manifests::Manifest::RoleBinding($obj) => $body,
            $crate::manifests::Manifest::ClusterRole($obj) => $body,
            $crate::manifests::Manifest::ClusterRoleBinding($obj) => $body,
            $crate::manifests::Manifest::Deployment($obj) => $body,
            $crate::manifests::Manifest::DaemonSet($obj) => $body,
            $crate::manifests::Manifest::CustomResourceDefinition($obj) => $body,
        }
    };
}

fn decode_as<K>(file: &str, value: Value) -> Result<Manifest, ManifestError>
where
    K: serde::de::DeserializeOwned + Into<Manifest>,
{
    serde_json::from_value::<K>(value)
        .map(Into::into)
        .map_err(|e| ManifestError::Decode {
            file: file.to_string(),
            message: e.to_string(),
        })
}

impl Manifest {
    /// Decode a JSON object into one of the supported kinds
    pub fn decode(file: &str, value: Value) -> Result<Self, ManifestError> {
        let api_version = value
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match (api_version.as_str(), kind.as_str()) {
            ("v1", "Namespace") => decode_as::<Namespace>(file, value),
            ("v1", "ServiceAccount") => decode_as::<ServiceAccount>(file, value),
            ("v1", "Secret") => decode_as::<Secret>(file, value),
            ("v1", "ConfigMap") => decode_as::<ConfigMap>(file, value),
            ("rbac.authorization.k8s.io/v1", "Role") => decode_as::<Role>(file, value),
            ("rbac.authorization.k8s.io/v1", "RoleBinding") => {
                decode_as::<RoleBinding>(file, value)
            }
            ("rbac.authorization.k8s.io/v1", "ClusterRole") => {
                decode_as::<ClusterRole>(file, value)
            }
            ("rbac.authorization.k8s.io/v1", "ClusterRoleBinding") => {
                decode_as::<ClusterRoleBinding>(file, value)
            }
            ("apps/v1", "Deployment") => decode_as::<Deployment>(file, value),
            ("apps/v1", "DaemonSet") => decode_as::<DaemonSet>(file, value),
            ("apiextensions.k8s.io/v1", "CustomResourceDefinition") => {
                decode_as::<CustomResourceDefinition>(file, value)
            }
            _ => Err(ManifestError::UnsupportedKind {
                file: file.to_string(),
                kind: format!("{api_version}/{kind}"),
            }),
        }
    }

    /// Kind name
    pub fn kind(&self) -> &'static str {
        match self {
            Manifest::Namespace(_) => "Namespace",
            Manifest::ServiceAccount(_) => "ServiceAccount",
            Manifest::Secret(_) => "Secret",
            Manifest::ConfigMap(_) => "ConfigMap",
            Manifest::Role(_) => "Role",
            Manifest::RoleBinding(_) => "RoleBinding",
            Manifest::ClusterRole(_) => "ClusterRole",
            Manifest::ClusterRoleBinding(_) => "ClusterRoleBinding",
            Manifest::Deployment(_) => "Deployment",
            Manifest::DaemonSet(_) => "DaemonSet",
            Manifest::CustomResourceDefinition(_) => "CustomResourceDefinition",
        }
    }

    /// Object metadata
    pub fn meta(&self) -> &ObjectMeta {
        each_manifest!(self, obj => obj.meta())
    }

    /// Object name
    pub fn name(&self) -> String {
        each_manifest!(self, obj => obj.name_any())
    }

    /// Object namespace, for namespaced kinds
    pub fn namespace(&self) -> Option<String> {
        each_manifest!(self, obj => obj.namespace())
    }

    /// `Kind namespace/name` for logs and events
    pub fn describe(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{} {}/{}", self.kind(), ns, self.name()),
            None => format!("{} {}", self.kind(), self.name()),
        }
    }

    /// Serialize with apiVersion and kind set, for embedding in a ManifestWork
    pub fn to_value(&self) -> Result<Value, Error> {
        Ok(each_manifest!(self, obj => serde_json::to_value(obj)?))
    }

    /// Merge the fields this addon manages onto `existing`.
    ///
    /// Returns the object to write, or `None` when `existing` already matches.
    pub fn merged_onto(&self, existing: Manifest) -> Result<Option<Manifest>, Error> {
        fn finish<K>(before: &K, after: K) -> Option<Manifest>
        where
            K: PartialEq + Into<Manifest>,
        {
            (before != &after).then(|| after.into())
        }

        let merged = match (self, existing) {
            (Manifest::Namespace(d), Manifest::Namespace(e)) => {
                let mut out = e.clone();
                merge_meta(&mut out.metadata, &d.metadata);
                finish(&e, out)
            }
            (Manifest::ServiceAccount(d), Manifest::ServiceAccount(e)) => {
                let mut out = e.clone();
                merge_meta(&mut out.metadata, &d.metadata);
                finish(&e, out)
            }
            (Manifest::Secret(d), Manifest::Secret(e)) => {
                let mut out = e.clone();
                merge_meta(&mut out.metadata, &d.metadata);
                out.data = d.data.clone();
                out.string_data = d.string_data.clone();
                out.type_ = d.type_.clone().or(out.type_);
                finish(&e, out)
            }
            (Manifest::ConfigMap(d), Manifest::ConfigMap(e)) => {
                let mut out = e.clone();
                merge_meta(&mut out.metadata, &d.metadata);
                out.data = d.data.clone();
                out.binary_data = d.binary_data.clone();
                finish(&e, out)
            }
            (Manifest::Role(d), Manifest::Role(e)) => {
                let mut out = e.clone();
                merge_meta(&mut out.metadata, &d.metadata);
                out.rules = d.rules.clone();
                finish(&e, out)
            }
            (Manifest::ClusterRole(d), Manifest::ClusterRole(e)) => {
                let mut out = e.clone();
                merge_meta(&mut out.metadata, &d.metadata);
                out.rules = d.rules.clone();
                out.aggregation_rule = d.aggregation_rule.clone();
                finish(&e, out)
            }
            (Manifest::RoleBinding(d), Manifest::RoleBinding(e)) => {
                let mut out = e.clone();
                merge_meta(&mut out.metadata, &d.metadata);
                out.subjects = d.subjects.clone();
                out.role_ref = d.role_ref.clone();
                finish(&e, out)
            }
            (Manifest::ClusterRoleBinding(d), Manifest::ClusterRoleBinding(e)) => {
                let mut out = e.clone();
                merge_meta(&mut out.metadata, &d.metadata);
                out.subjects = d.subjects.clone();
                out.role_ref = d.role_ref.clone();
                finish(&e, out)
            }
            (Manifest::Deployment(d), Manifest::Deployment(e)) => {
                let mut out = e.clone();
                merge_meta(&mut out.metadata, &d.metadata);
                if !spec_matches(&d.spec, &e.spec)? {
                    out.spec = d.spec.clone();
                }
                finish(&e, out)
            }
            (Manifest::DaemonSet(d), Manifest::DaemonSet(e)) => {
                let mut out = e.clone();
                merge_meta(&mut out.metadata, &d.metadata);
                if !spec_matches(&d.spec, &e.spec)? {
                    out.spec = d.spec.clone();
                }
                finish(&e, out)
            }
            (Manifest::CustomResourceDefinition(d), Manifest::CustomResourceDefinition(e)) => {
                let mut out = e.clone();
                merge_meta(&mut out.metadata, &d.metadata);
                if !spec_matches(&d.spec, &e.spec)? {
                    out.spec = d.spec.clone();
                }
                finish(&e, out)
            }
            (desired, existing) => {
                return Err(Error::internal_with_context(
                    "manifest-merge",
                    format!(
                        "cannot merge {} onto {}",
                        desired.kind(),
                        existing.kind()
                    ),
                ))
            }
        };
        Ok(merged)
    }
}

/// Server-defaulted specs match when every desired field is present with the same value
fn spec_matches<T: Serialize>(desired: &T, live: &T) -> Result<bool, Error> {
    Ok(is_subset(
        &serde_json::to_value(desired)?,
        &serde_json::to_value(live)?,
    ))
}

fn is_subset(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Object(d), Value::Object(l)) => d
            .iter()
            .all(|(k, v)| l.get(k).is_some_and(|lv| is_subset(v, lv))),
        (Value::Array(d), Value::Array(l)) => {
            d.len() == l.len() && d.iter().zip(l).all(|(dv, lv)| is_subset(dv, lv))
        }
        (Value::Null, _) => true,
        _ => desired == live,
    }
}

/// Desired labels and annotations win; keys only present on the live object are kept
fn merge_meta(existing: &mut ObjectMeta, desired: &ObjectMeta) {
    merge_map(&mut existing.labels, &desired.labels);
    merge_map(&mut existing.annotations, &desired.annotations);
    if desired.owner_references.is_some() {
        existing.owner_references = desired.owner_references.clone();
    }
}

fn merge_map(
    existing: &mut Option<BTreeMap<String, String>>,
    desired: &Option<BTreeMap<String, String>>,
) {
    let Some(desired) = desired else {
        return;
    };
    let target = existing.get_or_insert_with(BTreeMap::new);
    for (k, v) in desired {
        target.insert(k.clone(), v.clone());
    }
}
