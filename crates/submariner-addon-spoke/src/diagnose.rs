//! Diagnose controller
//!
//! Runs the checks a SubmarinerDiagnoseConfig selects, once per generation,
//! and writes one result per check plus `SubmarinerDiagnoseCompleted`.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use submariner_addon_common::conditions::find_condition;
use submariner_addon_common::crd::{
    Condition, ConditionStatus, DiagnoseCheck, DiagnoseOutcome, DiagnoseResult,
    SubmarinerDiagnoseConfig, SubmarinerDiagnoseStatus, CONDITION_DIAGNOSE_COMPLETED,
};
use submariner_addon_common::finalizer::is_being_deleted;
use submariner_addon_common::metrics::ReconcileTimer;
use submariner_addon_common::status::{update_condition_fn, update_status, UpdateStatusFn};
use submariner_addon_common::Error;
use tracing::{debug, info, instrument};

use crate::client::ClusterInspector;
use crate::connections::connection_conditions;
use crate::deployment::{deployment_problems, DeploymentSnapshot};
use crate::SpokeContext;

const CONTROLLER: &str = "spoke-diagnose";
const REASON_DIAGNOSE_COMPLETED: &str = "DiagnoseCompleted";

/// Oldest Kubernetes minor release Submariner supports
pub const MIN_K8S_MINOR: u32 = 19;

/// CNIs Submariner works with
pub const SUPPORTED_CNIS: [&str; 7] = [
    "OVNKubernetes",
    "OpenShiftSDN",
    "Calico",
    "Weave",
    "Flannel",
    "Canal",
    "Kindnet",
];

/// DaemonSet name prefixes that identify a CNI
const CNI_DAEMON_SETS: [(&str, &str); 7] = [
    ("ovnkube-node", "OVNKubernetes"),
    ("sdn", "OpenShiftSDN"),
    ("calico-node", "Calico"),
    ("weave-net", "Weave"),
    ("kube-flannel", "Flannel"),
    ("canal", "Canal"),
    ("kindnet", "Kindnet"),
];

/// `(major, minor)` of a `gitVersion` such as `v1.29.3+k3s1`
pub fn parse_version(git_version: &str) -> Option<(u32, u32)> {
    let mut parts = git_version.trim_start_matches('v').split('.');
    let major = parts.next()?.parse().ok()?;
    let minor: String = parts.next()?.chars().take_while(char::is_ascii_digit).collect();
    Some((major, minor.parse().ok()?))
}

fn check_k8s_version(git_version: &str) -> DiagnoseResult {
    match parse_version(git_version) {
        Some((major, minor)) if major > 1 || (major == 1 && minor >= MIN_K8S_MINOR) => {
            DiagnoseResult::success(format!("Kubernetes version {git_version} is supported"))
        }
        Some(_) => DiagnoseResult::failure(format!(
            "Kubernetes version {git_version} is older than the minimum supported 1.{MIN_K8S_MINOR}"
        )),
        None => DiagnoseResult::failure(format!("Cannot parse Kubernetes version {git_version}")),
    }
}

/// CNI from the operator's report, falling back to well-known DaemonSets
pub fn detect_cni(network_plugin: Option<&str>, daemon_sets: &[String]) -> Option<String> {
    if let Some(plugin) = network_plugin.filter(|p| !p.is_empty() && *p != "generic") {
        return Some(plugin.to_string());
    }
    daemon_sets.iter().find_map(|ds| {
        CNI_DAEMON_SETS
            .iter()
            .find(|(prefix, _)| ds.as_str() == *prefix || ds.starts_with(&format!("{prefix}-")))
            .map(|(_, cni)| cni.to_string())
    })
}

fn check_cni(cni: Option<String>) -> DiagnoseResult {
    match cni {
        None => DiagnoseResult::failure("Unable to detect the cluster CNI"),
        Some(cni) if SUPPORTED_CNIS.iter().any(|s| s.eq_ignore_ascii_case(&cni)) => {
            DiagnoseResult::success(format!("The CNI {cni} is supported"))
        }
        Some(cni) => DiagnoseResult::failure(format!("The CNI {cni} is not supported")),
    }
}

fn check_conditions(conditions: &[Condition], healthy: &str) -> DiagnoseResult {
    let degraded: Vec<&str> = conditions
        .iter()
        .filter(|c| c.status != ConditionStatus::False)
        .map(|c| c.message.as_str())
        .collect();
    if degraded.is_empty() {
        DiagnoseResult::success(healthy)
    } else {
        DiagnoseResult::failure(degraded.join("; "))
    }
}

fn check_kube_proxy(mode: Option<&str>) -> DiagnoseResult {
    match mode {
        Some("ipvs") => {
            DiagnoseResult::failure("kube-proxy runs in ipvs mode, which Submariner does not support")
        }
        Some(mode) => DiagnoseResult::success(format!("kube-proxy runs in {mode} mode")),
        None => DiagnoseResult::success("kube-proxy is not configured through its ConfigMap"),
    }
}

/// Run one check against the cluster
pub async fn run_check(
    check: DiagnoseCheck,
    inspector: &dyn ClusterInspector,
) -> Result<DiagnoseResult, Error> {
    let result = match check {
        DiagnoseCheck::K8sVersion => check_k8s_version(&inspector.server_version().await?),
        DiagnoseCheck::Cni => {
            let plugin = inspector
                .submariner()
                .await?
                .and_then(|s| s.status)
                .and_then(|s| s.network_plugin);
            let daemon_sets = inspector.daemon_set_names().await?;
            check_cni(detect_cni(plugin.as_deref(), &daemon_sets))
        }
        DiagnoseCheck::Connections => check_conditions(
            &connection_conditions(inspector).await?,
            "All connections are established",
        ),
        DiagnoseCheck::Deployment => {
            let snapshot = DeploymentSnapshot::load(inspector).await?;
            let problems = deployment_problems(&snapshot);
            if problems.is_empty() {
                DiagnoseResult::success("Submariner is deployed")
            } else {
                let messages: Vec<&str> = problems.iter().map(|(_, m)| m.as_str()).collect();
                DiagnoseResult::failure(messages.join("; "))
            }
        }
        DiagnoseCheck::KubeProxyMode => {
            check_kube_proxy(inspector.kube_proxy_mode().await?.as_deref())
        }
        DiagnoseCheck::Firewall => DiagnoseResult::skipped(
            "Firewall checks need privileged probe pods and are not run by the agent",
        ),
    };
    Ok(result)
}

fn already_diagnosed(diagnose: &SubmarinerDiagnoseConfig) -> bool {
    diagnose
        .status
        .as_ref()
        .and_then(|s| find_condition(&s.conditions, CONDITION_DIAGNOSE_COMPLETED))
        .is_some_and(|c| {
            c.status == ConditionStatus::True
                && c.observed_generation == diagnose.metadata.generation
        })
}

/// Run the selected checks and record the results
#[instrument(skip(diagnose, ctx), fields(cluster = %ctx.cluster_name, diagnose = %diagnose.name_any()))]
pub async fn reconcile(
    diagnose: Arc<SubmarinerDiagnoseConfig>,
    ctx: Arc<SpokeContext>,
) -> Result<Action, Error> {
    if is_being_deleted(diagnose.as_ref()) || already_diagnosed(&diagnose) {
        return Ok(Action::await_change());
    }
    let timer = ReconcileTimer::start(CONTROLLER);

    let result = async {
        let checks = diagnose.spec.selected();
        let mut results = Vec::with_capacity(checks.len());
        for check in checks {
            let result = run_check(check, ctx.inspector.as_ref()).await?;
            debug!(%check, status = ?result.status, "Check finished");
            results.push((check, result));
        }
        let failed = results
            .iter()
            .filter(|(_, r)| r.status == DiagnoseOutcome::Failure)
            .count();
        info!(checks = results.len(), failed, "Diagnose completed");

        let mut completed = Condition::truthy(
            CONDITION_DIAGNOSE_COMPLETED,
            REASON_DIAGNOSE_COMPLETED,
            format!("{} checks ran, {failed} failed", results.len()),
        );
        completed.observed_generation = diagnose.metadata.generation;

        let record: UpdateStatusFn<SubmarinerDiagnoseStatus> =
            Box::new(move |status: &mut SubmarinerDiagnoseStatus| {
                for (check, result) in &results {
                    status.set_result(*check, result.clone());
                }
            });
        update_status(
            ctx.diagnoses.as_ref(),
            &diagnose.name_any(),
            &[record, update_condition_fn(completed)],
        )
        .await?;
        Ok(Action::await_change())
    }
    .await;

    if result.is_ok() {
        ctx.backoff
            .on_success(&SpokeContext::backoff_key(CONTROLLER, &diagnose.name_any()));
    }
    timer.observe(result)
}

/// Requeue with backoff
pub fn error_policy(
    diagnose: Arc<SubmarinerDiagnoseConfig>,
    error: &Error,
    ctx: Arc<SpokeContext>,
) -> Action {
    ctx.backoff
        .on_error(&SpokeContext::backoff_key(CONTROLLER, &diagnose.name_any()), error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::Harness;
    use kube::api::ObjectMeta;
    use std::sync::Mutex;
    use submariner_addon_common::crd::SubmarinerDiagnoseSpec;

    fn diagnose(
        spec: SubmarinerDiagnoseSpec,
        status: Option<SubmarinerDiagnoseStatus>,
    ) -> SubmarinerDiagnoseConfig {
        SubmarinerDiagnoseConfig {
            metadata: ObjectMeta {
                name: Some("submariner".to_string()),
                namespace: Some("cluster1".to_string()),
                generation: Some(1),
                ..Default::default()
            },
            spec,
            status,
        }
    }

    fn recording_diagnoses(
        harness: &mut Harness,
        stored: SubmarinerDiagnoseConfig,
    ) -> Arc<Mutex<Vec<SubmarinerDiagnoseStatus>>> {
        let written = Arc::new(Mutex::new(Vec::new()));
        let seen = written.clone();
        harness
            .diagnoses
            .expect_get_opt()
            .returning(move |_| Ok(Some(stored.clone())));
        harness.diagnoses.expect_replace_status().returning(move |_, d| {
            seen.lock().unwrap().push(d.status.clone().unwrap_or_default());
            Ok(d.clone())
        });
        written
    }

    #[test]
    fn versions_parse_with_vendor_suffixes() {
        assert_eq!(parse_version("v1.29.3"), Some((1, 29)));
        assert_eq!(parse_version("v1.27.4+k3s1"), Some((1, 27)));
        assert_eq!(parse_version("v1.30+"), Some((1, 30)));
        assert_eq!(parse_version("garbage"), None);
    }

    #[test]
    fn old_kubernetes_fails() {
        assert_eq!(check_k8s_version("v1.18.20").status, DiagnoseOutcome::Failure);
        assert_eq!(check_k8s_version("v1.19.0").status, DiagnoseOutcome::Success);
    }

    #[test]
    fn cni_detection_prefers_the_operator_report() {
        let daemon_sets = vec!["kube-proxy".to_string(), "calico-node".to_string()];

        let detect = |plugin: Option<&str>, names: &[&str]| {
            let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
            detect_cni(plugin, &names)
        };

        assert_eq!(
            detect_cni(Some("OVNKubernetes"), &daemon_sets).as_deref(),
            Some("OVNKubernetes")
        );
        assert_eq!(detect_cni(None, &daemon_sets).as_deref(), Some("Calico"));
        assert_eq!(
            detect(Some("generic"), &["kube-flannel-ds"]).as_deref(),
            Some("Flannel")
        );
        assert_eq!(
            detect(None, &["sdn-controller", "kube-proxy"]).as_deref(),
            Some("OpenShiftSDN")
        );
        assert_eq!(detect(None, &["kube-proxy"]), None);
    }

    #[test]
    fn unknown_cni_fails() {
        assert_eq!(check_cni(Some("Cilium".to_string())).status, DiagnoseOutcome::Failure);
        assert_eq!(check_cni(None).status, DiagnoseOutcome::Failure);
        assert_eq!(check_cni(Some("kindnet".to_string())).status, DiagnoseOutcome::Success);
    }

    #[test]
    fn ipvs_kube_proxy_fails() {
        assert_eq!(check_kube_proxy(Some("ipvs")).status, DiagnoseOutcome::Failure);
        assert_eq!(check_kube_proxy(Some("iptables")).status, DiagnoseOutcome::Success);
    }

    #[tokio::test]
    async fn selected_checks_are_recorded() {
        let mut harness = Harness::new();
        let spec = SubmarinerDiagnoseSpec {
            k8s_version: true,
            kube_proxy_mode: true,
            firewall: true,
            ..Default::default()
        };
        let written = recording_diagnoses(&mut harness, diagnose(spec.clone(), None));
        harness
            .inspector
            .expect_server_version()
            .returning(|| Ok("v1.29.3".to_string()));
        harness
            .inspector
            .expect_kube_proxy_mode()
            .returning(|| Ok(Some("ipvs".to_string())));

        let action = reconcile(Arc::new(diagnose(spec, None)), harness.context())
            .await
            .unwrap();

        assert_eq!(action, Action::await_change());
        let status = written.lock().unwrap()[0].clone();
        assert_eq!(status.k8s_version.unwrap().status, DiagnoseOutcome::Success);
        assert_eq!(status.kube_proxy_mode.unwrap().status, DiagnoseOutcome::Failure);
        assert_eq!(status.firewall.unwrap().status, DiagnoseOutcome::Skipped);
        assert!(status.cni.is_none());
        let completed = find_condition(&status.conditions, CONDITION_DIAGNOSE_COMPLETED).unwrap();
        assert_eq!(completed.observed_generation, Some(1));
        assert_eq!(completed.message, "3 checks ran, 1 failed");
    }

    #[tokio::test]
    async fn completed_generation_is_not_rerun() {
        let mut completed =
            Condition::truthy(CONDITION_DIAGNOSE_COMPLETED, REASON_DIAGNOSE_COMPLETED, "done");
        completed.observed_generation = Some(1);
        let status = SubmarinerDiagnoseStatus {
            conditions: vec![completed],
            ..Default::default()
        };
        let spec = SubmarinerDiagnoseSpec {
            all: true,
            ..Default::default()
        };

        let action = reconcile(Arc::new(diagnose(spec, Some(status))), Harness::new().context())
            .await
            .unwrap();

        assert_eq!(action, Action::await_change());
    }
}
