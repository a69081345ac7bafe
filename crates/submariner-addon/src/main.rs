//! Submariner addon - hub controller-manager and managed-cluster agent

mod controller_runner;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use futures::future::join_all;
use kube::config::Kubeconfig;
use kube::Client;

use submariner_addon_common::crd::addon_crds;
use submariner_addon_common::kube_utils::{api_server_url, create_client};
use submariner_addon_common::leader_election::{
    LeaderElector, AGENT_LEASE_NAME, CONTROLLER_LEASE_NAME,
};
use submariner_addon_common::telemetry::{init_telemetry, Role, TelemetryConfig, TelemetryGuard};
use submariner_addon_common::yaml::to_yaml_string;
use submariner_addon_common::DEFAULT_INSTALL_NAMESPACE;
use submariner_addon_hub::assets::AGENT_NAMESPACE;
use submariner_addon_hub::AgentSettings;

use controller_runner::{build_hub_controllers, build_spoke_controllers, ControllerFuture};

/// Namespace holding the hub controller lease
const HUB_NAMESPACE: &str = "open-cluster-management";

/// Submariner addon for Open Cluster Management
#[derive(Parser, Debug)]
#[command(name = "submariner-addon", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the hub controller-manager
    ///
    /// Prepares one broker per ManagedClusterSet and deploys the Submariner
    /// operator to every cluster that enables the addon.
    Controller(ControllerArgs),

    /// Run the agent on a managed cluster
    Agent(AgentArgs),

    /// Print the addon CRDs as YAML and exit
    Crds,
}

/// Flags shared by both roles
#[derive(Args, Debug)]
struct CommonArgs {
    /// Kubeconfig of the cluster this process runs against (in-cluster when unset)
    #[arg(long, env = "SUBMARINER_ADDON_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Only run controllers while holding the role's lease
    #[arg(long, env = "SUBMARINER_ADDON_LEADER_ELECT")]
    leader_elect: bool,

    /// Namespace of the leader election lease
    #[arg(long, env = "SUBMARINER_ADDON_LEASE_NAMESPACE")]
    lease_namespace: Option<String>,

    /// OTLP endpoint for traces and metrics
    #[arg(long, env = "SUBMARINER_ADDON_METRICS_ENDPOINT")]
    metrics_endpoint: Option<String>,
}

#[derive(Args, Debug)]
struct ControllerArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Hub API server URL handed to managed clusters (defaults to the kubeconfig's)
    #[arg(long, env = "SUBMARINER_ADDON_BROKER_API_SERVER")]
    broker_api_server: Option<String>,

    /// Image of the addon agent deployed to managed clusters
    #[arg(long, env = "SUBMARINER_ADDON_AGENT_IMAGE")]
    agent_image: Option<String>,
}

#[derive(Args, Debug)]
struct AgentArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Kubeconfig of the hub cluster
    #[arg(long, env = "SUBMARINER_ADDON_HUB_KUBECONFIG")]
    hub_kubeconfig: PathBuf,

    /// Name of this managed cluster on the hub
    #[arg(long, env = "SUBMARINER_ADDON_CLUSTER_NAME")]
    cluster_name: String,

    /// Namespace Submariner is installed into
    #[arg(long, env = "SUBMARINER_ADDON_INSTALL_NAMESPACE", default_value = DEFAULT_INSTALL_NAMESPACE)]
    install_namespace: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Controller(args) => run_controller(args).await,
        Commands::Agent(args) => run_agent(args).await,
        Commands::Crds => print_crds(),
    }
}

fn print_crds() -> anyhow::Result<()> {
    for crd in addon_crds() {
        let value = serde_json::to_value(&crd)
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        let yaml =
            to_yaml_string(&value).map_err(|e| anyhow::anyhow!("Failed to emit CRD YAML: {}", e))?;
        println!("{yaml}");
    }
    Ok(())
}

fn init(config: TelemetryConfig) -> anyhow::Result<TelemetryGuard> {
    init_telemetry(config).map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))
}

async fn client(kubeconfig: Option<&Path>) -> anyhow::Result<Client> {
    create_client(kubeconfig)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))
}

/// Hub API server URL from the kubeconfig in use, or the in-cluster config
async fn default_api_server(kubeconfig: Option<&Path>) -> anyhow::Result<String> {
    if let Some(path) = kubeconfig {
        let config = Kubeconfig::read_from(path)
            .map_err(|e| anyhow::anyhow!("Failed to read kubeconfig {}: {}", path.display(), e))?;
        return api_server_url(&config)
            .ok_or_else(|| anyhow::anyhow!("Kubeconfig {} has no current cluster", path.display()));
    }
    let config = kube::Config::infer()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to infer Kubernetes config: {}", e))?;
    Ok(config.cluster_url.to_string())
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let _telemetry = init(TelemetryConfig::new(
        Role::Controller,
        args.common.metrics_endpoint.clone(),
    ))?;
    let kubeconfig = args.common.kubeconfig.as_deref();
    let client = client(kubeconfig).await?;

    let broker_api_server = match args.broker_api_server {
        Some(url) => url,
        None => default_api_server(kubeconfig).await?,
    };
    tracing::info!(%broker_api_server, agent_image = ?args.agent_image, "Starting submariner-addon controller");

    let settings = AgentSettings {
        broker_api_server,
        agent_image: args.agent_image,
        install_namespace: DEFAULT_INSTALL_NAMESPACE.to_string(),
    };
    let lease_namespace = args
        .common
        .lease_namespace
        .unwrap_or_else(|| HUB_NAMESPACE.to_string());

    run_with_leadership(
        client.clone(),
        CONTROLLER_LEASE_NAME,
        &lease_namespace,
        args.common.leader_elect,
        move || build_hub_controllers(client, settings),
    )
    .await
}

async fn run_agent(args: AgentArgs) -> anyhow::Result<()> {
    let _telemetry = init(
        TelemetryConfig::new(Role::Agent, args.common.metrics_endpoint.clone())
            .with_cluster(args.cluster_name.clone()),
    )?;
    let spoke = client(args.common.kubeconfig.as_deref()).await?;
    let hub = client(Some(args.hub_kubeconfig.as_path())).await?;
    tracing::info!(
        cluster = %args.cluster_name,
        install_namespace = %args.install_namespace,
        "Starting submariner-addon agent"
    );

    let lease_namespace = args
        .common
        .lease_namespace
        .unwrap_or_else(|| AGENT_NAMESPACE.to_string());
    let cluster_name = args.cluster_name;
    let install_namespace = args.install_namespace;

    run_with_leadership(
        spoke.clone(),
        AGENT_LEASE_NAME,
        &lease_namespace,
        args.common.leader_elect,
        move || build_spoke_controllers(hub, spoke, &cluster_name, &install_namespace),
    )
    .await
}

/// Run the controllers, optionally only while holding `lease`
///
/// Losing the lease exits with an error so the pod restarts as a follower.
async fn run_with_leadership(
    client: Client,
    lease: &str,
    namespace: &str,
    leader_elect: bool,
    controllers: impl FnOnce() -> Vec<ControllerFuture>,
) -> anyhow::Result<()> {
    if !leader_elect {
        join_all(controllers()).await;
        tracing::info!("Controllers stopped");
        return Ok(());
    }

    let identity = std::env::var("POD_NAME")
        .unwrap_or_else(|_| format!("submariner-addon-{}", std::process::id()));
    let elector = Arc::new(LeaderElector::new(client, lease, namespace, &identity));
    let mut guard = elector
        .acquire()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to acquire leadership: {}", e))?;

    let lost = tokio::select! {
        _ = join_all(controllers()) => false,
        _ = guard.lost() => true,
    };
    if lost {
        return Err(anyhow::anyhow!("Lost leadership of lease {}/{}", namespace, lease));
    }

    tracing::info!("Controllers stopped");
    if let Err(e) = guard.release_leadership().await {
        tracing::warn!(error = %e, "Failed to release lease");
    }
    Ok(())
}
