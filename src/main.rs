/// Shopstack - storefront microservices on GKE with Prometheus
///
/// Provisions a GKE cluster, deploys a demo e-commerce microservices
/// application from its upstream manifests and installs a Prometheus/Grafana
/// monitoring stack with Helm.
mod config;
mod gcloud;
mod k8s;
mod monitoring;
mod storefront;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::DeployConfig;
use crate::gcloud::{ClusterManager, GcpClient, ProjectVerifier};
use crate::k8s::KubernetesClient;
use crate::monitoring::MonitoringManager;
use crate::storefront::StorefrontManager;
use crate::utils::command::{check_tools, Tool};

#[derive(Parser)]
#[command(name = "shopstack")]
#[command(about = "Deploy a microservices storefront and monitoring stack on GKE", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "shopstack.yaml")]
    config: PathBuf,

    /// Output directory for generated files
    #[arg(short, long, default_value = "./output")]
    output: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate example configuration file
    Init,

    /// Provision the cluster, deploy the storefront and monitoring
    Deploy {
        /// Use the existing kubeconfig instead of provisioning the cluster
        #[arg(long)]
        skip_cluster: bool,

        /// Do not install the monitoring stack
        #[arg(long)]
        skip_monitoring: bool,
    },

    /// Show cluster, storefront and monitoring status
    Status,

    /// Print Grafana access details
    Credentials,

    /// Remove the deployment and the cluster
    Destroy {
        /// Remove workloads but keep the cluster
        #[arg(long)]
        keep_cluster: bool,
    },
}

impl Cli {
    fn kubeconfig_path(&self) -> PathBuf {
        self.output.join("kubeconfig")
    }

    fn load_config(&self) -> Result<DeployConfig> {
        DeployConfig::from_file(&self.config).context("Failed to load configuration")
    }

    fn storefront(&self, config: &DeployConfig, cancel: &CancellationToken) -> StorefrontManager {
        StorefrontManager::new(
            config.storefront.clone(),
            self.kubeconfig_path(),
            self.output.clone(),
            config.timeouts.clone(),
            cancel.clone(),
        )
    }

    fn monitoring(&self, config: &DeployConfig, cancel: &CancellationToken) -> MonitoringManager {
        MonitoringManager::new(
            config.monitoring.clone(),
            self.kubeconfig_path(),
            self.output.clone(),
            config.timeouts.clone(),
            cancel.clone(),
        )
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("shopstack={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupt received, stopping after the current step (Ctrl-C again to abort)");
        cancel_on_signal.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            error!("Aborted");
            std::process::exit(130);
        }
    });

    // Execute command
    let result = match cli.command {
        Commands::Init => init_config(&cli).await,
        Commands::Deploy {
            skip_cluster,
            skip_monitoring,
        } => deploy(&cli, &cancel, skip_cluster, skip_monitoring).await,
        Commands::Status => show_status(&cli, &cancel).await,
        Commands::Credentials => show_credentials(&cli, &cancel).await,
        Commands::Destroy { keep_cluster } => destroy(&cli, &cancel, keep_cluster).await,
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Stop between pipeline steps once an interrupt was received
fn checkpoint(cancel: &CancellationToken, next_step: &str) -> Result<()> {
    if cancel.is_cancelled() {
        anyhow::bail!("Interrupted before {}", next_step);
    }
    Ok(())
}

/// Build a cluster manager for the resolved project
async fn cluster_manager(
    config: &DeployConfig,
    cancel: &CancellationToken,
    verify: bool,
) -> Result<ClusterManager> {
    let project_id = config.resolve_project_id().await?;
    let token = config.resolve_access_token().await?;
    let client = GcpClient::new(token)?;

    if verify {
        ProjectVerifier::new(client.clone())
            .verify(&project_id)
            .await?;
    }

    Ok(ClusterManager::new(
        client,
        project_id,
        config.gcp.zone.clone(),
        config.timeouts.cluster_operation,
        cancel.clone(),
    ))
}

/// Run the full deployment pipeline
async fn deploy(
    cli: &Cli,
    cancel: &CancellationToken,
    skip_cluster: bool,
    skip_monitoring: bool,
) -> Result<()> {
    info!("Starting deployment...");

    // Check prerequisites
    let mut tools = vec![Tool::Kubectl, Tool::Git];
    if !skip_cluster {
        tools.push(Tool::Gcloud);
    }
    if !skip_monitoring {
        tools.push(Tool::Helm);
    }
    check_tools(&tools).await?;

    let config = cli.load_config()?;
    let kubeconfig_path = cli.kubeconfig_path();

    info!("Cluster name: {}", config.cluster.name);

    if skip_cluster {
        info!("Skipping cluster provisioning, using {}", kubeconfig_path.display());
    } else {
        let clusters = cluster_manager(&config, cancel, true).await?;
        checkpoint(cancel, "cluster provisioning")?;
        let cluster = clusters.ensure_cluster(&config.cluster).await?;
        info!(
            "Cluster {} is {} (master {}, {} nodes)",
            cluster.name,
            cluster.status,
            cluster.current_master_version.as_deref().unwrap_or("unknown"),
            cluster
                .current_node_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".to_string())
        );
        checkpoint(cancel, "fetching credentials")?;
        clusters
            .fetch_credentials(&config.cluster.name, &kubeconfig_path)
            .await?;
    }

    KubernetesClient::check_connection(&kubeconfig_path).await?;

    // Storefront
    checkpoint(cancel, "preparing the storefront")?;
    let storefront = cli.storefront(&config, cancel);
    let manifest = storefront.prepare().await?;
    checkpoint(cancel, "deploying the storefront")?;
    storefront.deploy(&manifest).await?;
    let ready = storefront.wait_for_pods().await?;
    info!("{} storefront pods ready", ready);

    // Monitoring
    let grafana = if skip_monitoring {
        info!("Skipping monitoring stack");
        None
    } else {
        checkpoint(cancel, "installing monitoring")?;
        let monitoring = cli.monitoring(&config, cancel);
        monitoring.install().await?;
        checkpoint(cancel, "exposing Grafana")?;
        let address = monitoring.expose_grafana().await?;
        let credentials = monitoring.grafana_credentials().await?;
        Some((address, credentials))
    };

    let frontend = storefront.wait_for_frontend().await?;

    info!("✓ Deployment completed successfully!");
    info!("");
    info!("Storefront:");
    info!("  URL: http://{}", frontend);
    info!("  Namespace: {}", config.storefront.namespace);
    if let Some((address, credentials)) = grafana {
        info!("");
        info!("Grafana:");
        info!("  URL: http://{}", address);
        info!("  User: {}", credentials.user);
        info!("  Password: {}", credentials.password);
    }
    info!("");
    info!("To access your cluster:");
    info!("  export KUBECONFIG={}", kubeconfig_path.display());
    info!("  kubectl get pods -n {}", config.storefront.namespace);

    Ok(())
}

/// Show cluster status
async fn show_status(cli: &Cli, cancel: &CancellationToken) -> Result<()> {
    let config = cli.load_config()?;

    info!("Cluster: {}", config.cluster.name);
    match cluster_manager(&config, cancel, false).await {
        Ok(clusters) => match clusters.find_cluster(&config.cluster.name).await? {
            Some(cluster) => {
                info!("  Status: {}", cluster.status);
                info!("  Location: {} (region {})", cluster.location, config.region());
                info!(
                    "  Endpoint: {}",
                    cluster.endpoint.as_deref().unwrap_or("N/A")
                );
                info!(
                    "  Version: {}",
                    cluster.current_master_version.as_deref().unwrap_or("N/A")
                );
                if let Some(created) = cluster.create_time {
                    info!("  Created: {}", created.format("%Y-%m-%d %H:%M:%S UTC"));
                }
                for pool in &cluster.node_pools {
                    info!(
                        "  Node pool {}: {} x {} ({})",
                        pool.name,
                        pool.initial_node_count,
                        pool.config
                            .as_ref()
                            .map(|c| c.machine_type.as_str())
                            .unwrap_or("unknown"),
                        pool.status.as_deref().unwrap_or("N/A")
                    );
                }
            }
            None => {
                info!("  Not found");
                return Ok(());
            }
        },
        Err(e) => warn!("  Could not query cluster: {:#}", e),
    }

    let kubeconfig_path = cli.kubeconfig_path();
    if !kubeconfig_path.exists() {
        info!("");
        info!("No kubeconfig at {}; run `shopstack deploy` first", kubeconfig_path.display());
        return Ok(());
    }

    let storefront = cli.storefront(&config, cancel);
    info!("");
    info!("Storefront pods ({}):", config.storefront.namespace);
    let pods = storefront.pods().await?;
    for pod in &pods {
        info!(
            "    - {} (Phase: {}, Ready: {}, Restarts: {})",
            pod.name, pod.phase, pod.ready, pod.restarts
        );
    }
    info!(
        "  {}/{} ready",
        pods.iter().filter(|p| p.is_serving()).count(),
        config.storefront.expected_pods
    );
    match storefront.frontend_address().await {
        Ok(Some(address)) => info!("  URL: http://{}", address),
        Ok(None) => info!("  URL: pending"),
        Err(e) => info!("  URL: unavailable ({})", e),
    }

    let monitoring = cli.monitoring(&config, cancel);
    info!("");
    info!("Monitoring:");
    if monitoring.release_exists().await? {
        info!("  Release: {} installed", config.monitoring.release);
        match monitoring.grafana_address().await {
            Ok(Some(address)) => info!("  Grafana: http://{}", address),
            Ok(None) => info!("  Grafana: external IP pending"),
            Err(e) => info!("  Grafana: not exposed ({})", e),
        }
    } else {
        info!("  Release: not installed");
    }

    Ok(())
}

/// Print Grafana URL and login
async fn show_credentials(cli: &Cli, cancel: &CancellationToken) -> Result<()> {
    let config = cli.load_config()?;
    KubernetesClient::check_connection(&cli.kubeconfig_path()).await?;

    let monitoring = cli.monitoring(&config, cancel);
    if !monitoring.release_exists().await? {
        anyhow::bail!(
            "Monitoring release {} is not installed",
            config.monitoring.release
        );
    }

    let credentials = monitoring.grafana_credentials().await?;
    let address = monitoring
        .grafana_address()
        .await?
        .map(|a| format!("http://{}", a))
        .unwrap_or_else(|| "pending".to_string());

    info!("Grafana:");
    info!("  URL: {}", address);
    info!("  User: {}", credentials.user);
    info!("  Password: {}", credentials.password);

    Ok(())
}

/// Remove workloads and, unless kept, the cluster
async fn destroy(cli: &Cli, cancel: &CancellationToken, keep_cluster: bool) -> Result<()> {
    info!("Starting teardown...");

    let config = cli.load_config()?;
    let kubeconfig_path = cli.kubeconfig_path();

    if kubeconfig_path.exists() {
        let workloads = async {
            cli.monitoring(&config, cancel).uninstall().await?;
            cli.storefront(&config, cancel).remove().await
        }
        .await;

        match workloads {
            Ok(()) => {}
            // The cluster is going away anyway
            Err(e) if !keep_cluster => warn!("Workload removal failed: {:#}", e),
            Err(e) => return Err(e),
        }
    } else {
        info!("No kubeconfig found, skipping workload removal");
    }

    if keep_cluster {
        info!("✓ Workloads removed, cluster {} kept", config.cluster.name);
        return Ok(());
    }

    checkpoint(cancel, "deleting the cluster")?;
    let clusters = cluster_manager(&config, cancel, false).await?;
    clusters.delete_cluster(&config.cluster.name).await?;

    if kubeconfig_path.exists() {
        tokio::fs::remove_file(&kubeconfig_path)
            .await
            .context("Failed to remove kubeconfig")?;
    }

    info!("✓ Deployment destroyed successfully");

    Ok(())
}

/// Initialize example configuration file
async fn init_config(cli: &Cli) -> Result<()> {
    if cli.config.exists() {
        anyhow::bail!(
            "Configuration file already exists: {}",
            cli.config.display()
        );
    }

    let example_config = DeployConfig::example();
    let yaml = serde_yaml::to_string(&example_config)?;

    tokio::fs::write(&cli.config, yaml)
        .await
        .context("Failed to write configuration file")?;

    info!("Example configuration created: {}", cli.config.display());
    info!("");
    info!("Next steps:");
    info!("  1. Edit the configuration file to match your requirements");
    info!("  2. Authenticate and pick a project:");
    info!("     gcloud auth login");
    info!("     gcloud config set project <project-id>");
    info!("  3. Deploy:");
    info!("     shopstack deploy");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_deploy_flags() {
        let cli = Cli::try_parse_from([
            "shopstack",
            "--output",
            "/tmp/out",
            "deploy",
            "--skip-monitoring",
        ])
        .unwrap();

        assert_eq!(cli.kubeconfig_path(), PathBuf::from("/tmp/out/kubeconfig"));
        match cli.command {
            Commands::Deploy {
                skip_cluster,
                skip_monitoring,
            } => {
                assert!(!skip_cluster);
                assert!(skip_monitoring);
            }
            _ => panic!("expected deploy"),
        }
    }

    #[test]
    fn test_checkpoint_stops_after_interrupt() {
        let cancel = CancellationToken::new();
        tokio_test::assert_ok!(checkpoint(&cancel, "deploying the storefront"));

        cancel.cancel();
        let err = checkpoint(&cancel, "deploying the storefront").unwrap_err();
        assert_eq!(err.to_string(), "Interrupted before deploying the storefront");
    }

    #[tokio::test]
    async fn test_init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shopstack.yaml");
        let cli = Cli::try_parse_from(["shopstack", "--config", path.to_str().unwrap(), "init"])
            .unwrap();

        init_config(&cli).await.unwrap();
        let config = DeployConfig::from_file(&path).unwrap();
        assert_eq!(config.cluster.name, "online-boutique");

        // A second init must not overwrite
        assert!(init_config(&cli).await.is_err());
    }
}
