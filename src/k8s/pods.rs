/// Kubernetes pod readiness queries
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

use crate::utils::command::CommandBuilder;
use crate::utils::polling::PollingConfig;

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: PodMetadata,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodMetadata {
    name: String,
    #[serde(default)]
    deletion_timestamp: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodStatus {
    #[serde(default)]
    phase: String,
    #[serde(default)]
    conditions: Vec<PodCondition>,
    #[serde(default)]
    container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Deserialize)]
struct PodCondition {
    #[serde(rename = "type")]
    condition_type: String,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContainerStatus {
    #[serde(default)]
    restart_count: u32,
}

/// Condensed view of a pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSummary {
    pub name: String,
    pub phase: String,
    pub ready: bool,
    pub terminating: bool,
    pub restarts: u32,
}

impl PodSummary {
    /// Counts toward the readiness target
    pub fn is_serving(&self) -> bool {
        self.ready && !self.terminating
    }
}

impl From<Pod> for PodSummary {
    fn from(pod: Pod) -> Self {
        let ready = pod
            .status
            .conditions
            .iter()
            .any(|c| c.condition_type == "Ready" && c.status.eq_ignore_ascii_case("true"));
        Self {
            name: pod.metadata.name,
            phase: pod.status.phase,
            ready,
            terminating: pod.metadata.deletion_timestamp.is_some(),
            restarts: pod
                .status
                .container_statuses
                .iter()
                .map(|c| c.restart_count)
                .sum(),
        }
    }
}

/// Pod queries against a namespace
pub struct PodManager;

impl PodManager {
    fn parse_pods(json: &str) -> Result<Vec<PodSummary>> {
        let list: PodList = serde_json::from_str(json).context("Failed to parse pod list")?;
        Ok(list.items.into_iter().map(PodSummary::from).collect())
    }

    /// List pods in a namespace
    pub async fn list_pods(kubeconfig_path: &Path, namespace: &str) -> Result<Vec<PodSummary>> {
        let stdout = CommandBuilder::new("kubectl")
            .args(["get", "pods", "-n", namespace, "-o", "json"])
            .kubeconfig(kubeconfig_path)
            .context("Failed to list pods")
            .run()
            .await?;

        Self::parse_pods(&stdout)
    }

    /// Number of ready, non-terminating pods in a namespace
    pub async fn ready_pod_count(kubeconfig_path: &Path, namespace: &str) -> Result<usize> {
        let pods = Self::list_pods(kubeconfig_path, namespace).await?;
        Ok(pods.iter().filter(|p| p.is_serving()).count())
    }

    /// Poll until at least `expected` pods are ready, returning the final count
    pub async fn wait_for_ready_pods(
        kubeconfig_path: &Path,
        namespace: &str,
        expected: usize,
        polling: PollingConfig,
    ) -> Result<usize> {
        polling
            .poll(|| async {
                let ready = Self::ready_pod_count(kubeconfig_path, namespace).await?;
                debug!("{}/{} pods ready in {}", ready, expected, namespace);
                Ok((ready >= expected).then_some(ready))
            })
            .await
    }
}
