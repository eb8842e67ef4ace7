/// Kubernetes operations client
use anyhow::{Context, Result};
use std::path::Path;

use crate::utils::command::CommandBuilder;

/// Kubernetes client for kubectl operations
pub struct KubernetesClient;

impl KubernetesClient {
    /// Check that the kubeconfig reaches a live API server
    pub async fn check_connection(kubeconfig_path: &Path) -> Result<()> {
        if !kubeconfig_path.exists() {
            anyhow::bail!(
                "Kubeconfig not found at {}. Run `shopstack deploy` first.",
                kubeconfig_path.display()
            );
        }

        CommandBuilder::new("kubectl")
            .args(["version", "--request-timeout=10s"])
            .kubeconfig(kubeconfig_path)
            .context("Failed to reach the Kubernetes API server")
            .run_silent()
            .await
            .context("Cluster is not reachable with the saved kubeconfig")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_kubeconfig() {
        let dir = tempfile::tempdir().unwrap();
        let err = KubernetesClient::check_connection(&dir.path().join("kubeconfig"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Kubeconfig not found"));
    }
}
