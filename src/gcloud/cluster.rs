/// GKE cluster lifecycle
use anyhow::{Context, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::GcpClient;
use super::models::{
    Cluster, ClusterSpec, ClusterStatus, CreateClusterRequest, NodeConfig, NodePool, Operation,
    OperationStatus, ReleaseChannel,
};
use crate::config::{ClusterConfig, PollSettings};
use crate::utils::command::CommandBuilder;
use crate::utils::polling::PollingConfig;

const DEFAULT_POOL: &str = "default-pool";

/// What deleting a cluster involves given its current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeleteStep {
    Absent,
    AwaitRemoval,
    Delete,
}

/// Cluster manager for a single project and zone
pub struct ClusterManager {
    client: GcpClient,
    project_id: String,
    zone: String,
    polling: PollSettings,
    cancel: CancellationToken,
}

impl ClusterManager {
    /// Create a new cluster manager
    pub fn new(
        client: GcpClient,
        project_id: impl Into<String>,
        zone: impl Into<String>,
        polling: PollSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            project_id: project_id.into(),
            zone: zone.into(),
            polling,
            cancel,
        }
    }

    /// Look up a cluster by name
    pub async fn find_cluster(&self, name: &str) -> Result<Option<Cluster>> {
        self.client
            .get_cluster(&self.project_id, &self.zone, name)
            .await
            .with_context(|| format!("Failed to look up cluster {}", name))
    }

    /// Reuse the named cluster if it exists, otherwise create it
    pub async fn ensure_cluster(&self, config: &ClusterConfig) -> Result<Cluster> {
        if let Some(cluster) = self.find_cluster(&config.name).await? {
            info!(
                "Found existing cluster: {} (status: {})",
                cluster.name, cluster.status
            );
            let status = cluster.status;
            return match status {
                status if status.is_usable() => Ok(cluster),
                status if status.is_transient() => self.wait_for_running(&config.name).await,
                status => anyhow::bail!(
                    "Cluster {} exists but is {}{}",
                    cluster.name,
                    status,
                    cluster
                        .status_message
                        .as_deref()
                        .map(|m| format!(": {}", m))
                        .unwrap_or_default()
                ),
            };
        }

        info!(
            "Creating cluster {} in {} ({} x {})",
            config.name, self.zone, config.num_nodes, config.machine_type
        );

        let request = Self::build_create_request(config);
        let operation = self
            .client
            .create_cluster(&self.project_id, &self.zone, &request)
            .await
            .context("Failed to create cluster")?;

        self.wait_for_operation(&operation, &format!("Creating cluster {}", config.name))
            .await?;

        let cluster = self.wait_for_running(&config.name).await?;
        info!("Cluster created successfully: {}", cluster.name);

        Ok(cluster)
    }

    /// Build the create request for the configured cluster shape
    pub fn build_create_request(config: &ClusterConfig) -> CreateClusterRequest {
        CreateClusterRequest {
            cluster: ClusterSpec {
                name: config.name.clone(),
                node_pools: vec![NodePool {
                    name: DEFAULT_POOL.to_string(),
                    initial_node_count: config.num_nodes,
                    config: Some(NodeConfig {
                        machine_type: config.machine_type.clone(),
                        disk_size_gb: config.disk_size_gb,
                        oauth_scopes: vec![
                            "https://www.googleapis.com/auth/cloud-platform".to_string(),
                        ],
                    }),
                    status: None,
                }],
                release_channel: config.release_channel.as_ref().map(|channel| ReleaseChannel {
                    channel: channel.to_uppercase(),
                }),
                resource_labels: [("managed-by".to_string(), "shopstack".to_string())]
                    .into_iter()
                    .collect(),
            },
        }
    }

    /// Wait until the cluster reports a usable status
    pub async fn wait_for_running(&self, name: &str) -> Result<Cluster> {
        PollingConfig::from_settings(
            &self.polling,
            format!("Waiting for cluster {} to be RUNNING", name),
        )
        .cancel_on(&self.cancel)
        .poll(|| async {
            let cluster = self
                .find_cluster(name)
                .await?
                .with_context(|| format!("Cluster {} disappeared", name))?;
            let status = cluster.status;
            match status {
                status if status.is_usable() => Ok(Some(cluster)),
                status if status.is_transient() => Ok(None),
                status => anyhow::bail!("Cluster {} entered status {}", name, status),
            }
        })
        .await
    }

    /// Wait for a long-running operation to finish successfully
    async fn wait_for_operation(&self, operation: &Operation, description: &str) -> Result<()> {
        let op_name = operation.name.clone();
        let finished = PollingConfig::from_settings(&self.polling, description)
            .cancel_on(&self.cancel)
            .poll(|| async {
                let op = self
                    .client
                    .get_operation(&self.project_id, &self.zone, &op_name)
                    .await?;
                Ok((op.status == OperationStatus::Done).then_some(op))
            })
            .await?;

        if let Some(failure) = finished.failure() {
            anyhow::bail!("Operation {} failed: {}", finished.name, failure);
        }

        if let (Some(start), Some(end)) = (finished.start_time, finished.end_time) {
            debug!(
                "{} {} took {}s",
                finished.operation_type,
                finished.name,
                (end - start).num_seconds()
            );
        }

        Ok(())
    }

    fn delete_step(cluster: Option<&Cluster>) -> DeleteStep {
        match cluster {
            None => DeleteStep::Absent,
            Some(cluster) if cluster.status == ClusterStatus::Stopping => {
                DeleteStep::AwaitRemoval
            }
            Some(_) => DeleteStep::Delete,
        }
    }

    /// Delete the cluster, doing nothing if it does not exist
    pub async fn delete_cluster(&self, name: &str) -> Result<()> {
        let cluster = self.find_cluster(name).await?;

        match Self::delete_step(cluster.as_ref()) {
            DeleteStep::Absent => {
                info!("Cluster {} not found, nothing to delete", name);
                return Ok(());
            }
            DeleteStep::AwaitRemoval => {
                warn!("Cluster {} is already being deleted, waiting for it", name);
                self.wait_for_removal(name).await?;
            }
            DeleteStep::Delete => {
                info!("Deleting cluster: {}", name);
                let operation = self
                    .client
                    .delete_cluster(&self.project_id, &self.zone, name)
                    .await
                    .context("Failed to delete cluster")?;

                self.wait_for_operation(&operation, &format!("Deleting cluster {}", name))
                    .await?;
            }
        }

        info!("Cluster deleted successfully");
        Ok(())
    }

    /// Wait until the cluster no longer exists
    async fn wait_for_removal(&self, name: &str) -> Result<()> {
        PollingConfig::from_settings(
            &self.polling,
            format!("Waiting for cluster {} to be removed", name),
        )
        .cancel_on(&self.cancel)
        .poll_until(|| async { Ok(self.find_cluster(name).await?.is_none()) })
        .await
    }

    /// Arguments for `gcloud container clusters get-credentials`
    fn credentials_args(&self, name: &str) -> Vec<String> {
        vec![
            "container".to_string(),
            "clusters".to_string(),
            "get-credentials".to_string(),
            name.to_string(),
            "--zone".to_string(),
            self.zone.clone(),
            "--project".to_string(),
            self.project_id.clone(),
        ]
    }

    /// Write cluster credentials into the given kubeconfig file
    pub async fn fetch_credentials(&self, name: &str, kubeconfig_path: &Path) -> Result<()> {
        info!("Fetching credentials for cluster {}...", name);

        if let Some(parent) = kubeconfig_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create output directory")?;
        }

        CommandBuilder::new("gcloud")
            .args(self.credentials_args(name))
            .kubeconfig(kubeconfig_path)
            .context("Failed to fetch cluster credentials")
            .run_silent()
            .await?;

        info!("Kubeconfig written to: {}", kubeconfig_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_config() -> ClusterConfig {
        ClusterConfig {
            name: "online-boutique".to_string(),
            machine_type: "e2-standard-2".to_string(),
            num_nodes: 4,
            disk_size_gb: 40,
            release_channel: Some("regular".to_string()),
        }
    }

    fn manager() -> ClusterManager {
        ClusterManager::new(
            GcpClient::new("token".to_string()).unwrap(),
            "demo-123",
            "us-central1-a",
            PollSettings {
                timeout_secs: 60,
                interval_secs: 5,
            },
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_create_request_from_config() {
        let request = ClusterManager::build_create_request(&cluster_config());
        let pool = &request.cluster.node_pools[0];

        assert_eq!(request.cluster.name, "online-boutique");
        assert_eq!(pool.name, "default-pool");
        assert_eq!(pool.initial_node_count, 4);
        assert_eq!(pool.config.as_ref().unwrap().machine_type, "e2-standard-2");
        assert_eq!(
            request.cluster.release_channel.as_ref().unwrap().channel,
            "REGULAR"
        );
        assert_eq!(
            request.cluster.resource_labels.get("managed-by").map(String::as_str),
            Some("shopstack")
        );
    }

    #[test]
    fn test_credentials_args() {
        assert_eq!(
            manager().credentials_args("online-boutique"),
            vec![
                "container",
                "clusters",
                "get-credentials",
                "online-boutique",
                "--zone",
                "us-central1-a",
                "--project",
                "demo-123",
            ]
        );
    }

    fn cluster_with_status(status: &str) -> Cluster {
        serde_json::from_value(serde_json::json!({
            "name": "online-boutique",
            "status": status,
        }))
        .unwrap()
    }

    #[test]
    fn test_delete_step() {
        assert_eq!(ClusterManager::delete_step(None), DeleteStep::Absent);
        assert_eq!(
            ClusterManager::delete_step(Some(&cluster_with_status("STOPPING"))),
            DeleteStep::AwaitRemoval
        );
        for status in ["RUNNING", "ERROR", "PROVISIONING", "DEGRADED"] {
            assert_eq!(
                ClusterManager::delete_step(Some(&cluster_with_status(status))),
                DeleteStep::Delete
            );
        }
    }

    #[tokio::test]
    #[ignore] // Requires Google Cloud credentials
    async fn test_find_cluster_live() {
        let token = std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN").expect("token not set");
        let project = std::env::var("GOOGLE_CLOUD_PROJECT").expect("project not set");
        let manager = ClusterManager::new(
            GcpClient::new(token).unwrap(),
            project,
            "us-central1-a",
            PollSettings {
                timeout_secs: 60,
                interval_secs: 5,
            },
            CancellationToken::new(),
        );
        let _ = manager.find_cluster("shopstack-missing").await.unwrap();
    }
}
