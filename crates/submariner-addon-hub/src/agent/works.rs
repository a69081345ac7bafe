//! ManifestWorks delivering the operator and the Submariner CR to a cluster

use submariner_addon_common::crd::ManifestWork;
use submariner_addon_common::manifests::ManifestRenderer;
use submariner_addon_common::work::{build_manifest_work, OPERATOR_WORK_NAME, RESOURCE_WORK_NAME};
use submariner_addon_common::Error;

use crate::assets::{AgentManifestConfig, SUBMARINER_RESOURCE};

fn render_work(
    renderer: &ManifestRenderer,
    namespace: &str,
    name: &str,
    files: &[&str],
    config: &AgentManifestConfig,
) -> Result<ManifestWork, Error> {
    let mut manifests = Vec::new();
    for file in files {
        manifests.extend(renderer.render_values(file, config)?);
    }
    Ok(build_manifest_work(namespace, name, manifests))
}

/// Operator bundle: namespace, OLM objects and, on OpenShift, SCC RBAC
pub fn operator_work(
    renderer: &ManifestRenderer,
    namespace: &str,
    config: &AgentManifestConfig,
) -> Result<ManifestWork, Error> {
    render_work(
        renderer,
        namespace,
        OPERATOR_WORK_NAME,
        &config.operator_files(),
        config,
    )
}

/// The `Submariner` CR
pub fn resource_work(
    renderer: &ManifestRenderer,
    namespace: &str,
    config: &AgentManifestConfig,
) -> Result<ManifestWork, Error> {
    render_work(
        renderer,
        namespace,
        RESOURCE_WORK_NAME,
        &[SUBMARINER_RESOURCE],
        config,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::renderer;
    use crate::assets::tests::agent_config;
    use serde_json::Value;

    fn kinds_and_names(work: &ManifestWork) -> Vec<(String, String)> {
        work.spec
            .workload
            .manifests
            .iter()
            .map(|m| {
                (
                    m["kind"].as_str().unwrap_or_default().to_string(),
                    m["metadata"]["name"].as_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }

    fn has_scc(work: &ManifestWork) -> bool {
        kinds_and_names(work)
            .iter()
            .any(|(_, name)| name == "ocm:submariner:scc:privileged")
    }

    #[test]
    fn openshift_operator_work_carries_scc_rbac() {
        let work = operator_work(&renderer(), "cluster1", &agent_config(true)).unwrap();

        assert_eq!(work.metadata.name.as_deref(), Some(OPERATOR_WORK_NAME));
        assert_eq!(work.metadata.namespace.as_deref(), Some("cluster1"));
        assert!(has_scc(&work));
        let kinds: Vec<_> = kinds_and_names(&work).into_iter().map(|(k, _)| k).collect();
        assert!(kinds.contains(&"ClusterRole".to_string()));
        assert!(kinds.contains(&"ClusterRoleBinding".to_string()));
    }

    #[test]
    fn other_clusters_get_no_scc_rbac() {
        let work = operator_work(&renderer(), "cluster1", &agent_config(false)).unwrap();

        assert!(!has_scc(&work));
        let kinds: Vec<_> = kinds_and_names(&work).into_iter().map(|(k, _)| k).collect();
        assert_eq!(kinds, ["Namespace", "OperatorGroup", "Subscription"]);
    }

    #[test]
    fn resource_work_carries_only_the_submariner_cr() {
        let work = resource_work(&renderer(), "cluster1", &agent_config(false)).unwrap();

        let manifests = &work.spec.workload.manifests;
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0]["kind"], Value::from("Submariner"));
    }
}
