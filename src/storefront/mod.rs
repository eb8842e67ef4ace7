/// Storefront microservices deployment
pub mod patch;
pub mod quantity;
pub mod source;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{StorefrontConfig, TimeoutConfig};
use crate::k8s::pods::PodSummary;
use crate::k8s::{PodManager, ResourceManager};
use crate::utils::polling::PollingConfig;

pub use patch::ResourcePatch;
pub use source::RepoManager;

const PATCHED_MANIFEST: &str = "storefront-manifests.yaml";

/// Deploys the storefront manifests and tracks their readiness
pub struct StorefrontManager {
    config: StorefrontConfig,
    kubeconfig_path: PathBuf,
    output_dir: PathBuf,
    timeouts: TimeoutConfig,
    cancel: CancellationToken,
}

impl StorefrontManager {
    /// Create a new storefront manager
    pub fn new(
        config: StorefrontConfig,
        kubeconfig_path: PathBuf,
        output_dir: PathBuf,
        timeouts: TimeoutConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            kubeconfig_path,
            output_dir,
            timeouts,
            cancel,
        }
    }

    /// Directory name for the checkout, taken from the repository URL
    fn repo_dir_name(repo_url: &str) -> String {
        url::Url::parse(repo_url)
            .ok()
            .and_then(|url| {
                url.path_segments()
                    .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
                    .map(|s| s.trim_end_matches(".git").to_string())
            })
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "storefront".to_string())
    }

    /// Where the repository is cloned
    pub fn checkout_dir(&self) -> PathBuf {
        self.output_dir
            .join(Self::repo_dir_name(&self.config.repo_url))
    }

    /// Where the resource-patched manifest is written
    pub fn patched_manifest_path(&self) -> PathBuf {
        self.output_dir.join(PATCHED_MANIFEST)
    }

    /// Clone the source and write the patched manifest, returning its path
    pub async fn prepare(&self) -> Result<PathBuf> {
        let checkout = self.checkout_dir();
        RepoManager::ensure_checkout(&self.config.repo_url, &self.config.git_ref, &checkout)
            .await?;

        match RepoManager::head_revision(&checkout).await {
            Ok(rev) => info!("Storefront source at {}", rev),
            Err(e) => warn!("Could not read checkout revision: {:#}", e),
        }

        let source = checkout.join(&self.config.manifest_path);
        if !source.exists() {
            anyhow::bail!(
                "Manifest {} not found in {}",
                self.config.manifest_path,
                checkout.display()
            );
        }

        let patch = ResourcePatch::from_config(&self.config.resources)?;
        if patch.is_noop() {
            info!("No resource substitutions configured, deploying manifest as-is");
        }

        let destination = self.patched_manifest_path();
        let result = patch.apply_to_file(&source, &destination).await?;
        for sub in &result.substitutions {
            info!(
                "  line {}: {:?}.{:?} {} -> {}",
                sub.line, sub.section, sub.resource, sub.from, sub.to
            );
        }

        Ok(destination)
    }

    /// Apply the manifest into the storefront namespace
    pub async fn deploy(&self, manifest: &Path) -> Result<()> {
        info!("Deploying storefront to namespace {}...", self.config.namespace);

        ResourceManager::ensure_namespace(&self.kubeconfig_path, &self.config.namespace).await?;
        ResourceManager::apply_manifest(&self.kubeconfig_path, manifest, &self.config.namespace)
            .await?;

        info!("Storefront manifests applied");
        Ok(())
    }

    /// Wait until the expected number of pods are ready
    pub async fn wait_for_pods(&self) -> Result<usize> {
        let expected = self.config.expected_pods as usize;
        let polling = PollingConfig::from_settings(
            &self.timeouts.pods_ready,
            format!("Waiting for {} storefront pods to be ready", expected),
        )
        .cancel_on(&self.cancel);

        PodManager::wait_for_ready_pods(
            &self.kubeconfig_path,
            &self.config.namespace,
            expected,
            polling,
        )
        .await
    }

    /// Pods currently in the storefront namespace
    pub async fn pods(&self) -> Result<Vec<PodSummary>> {
        PodManager::list_pods(&self.kubeconfig_path, &self.config.namespace).await
    }

    /// Frontend external address, if already assigned
    pub async fn frontend_address(&self) -> Result<Option<String>> {
        ResourceManager::service_external_address(
            &self.kubeconfig_path,
            &self.config.namespace,
            &self.config.frontend_service,
        )
        .await
    }

    /// Wait for the frontend load balancer to get an address
    pub async fn wait_for_frontend(&self) -> Result<String> {
        let polling = PollingConfig::from_settings(
            &self.timeouts.external_ip,
            format!(
                "Waiting for external IP on {}",
                self.config.frontend_service
            ),
        )
        .cancel_on(&self.cancel);

        ResourceManager::wait_for_external_address(
            &self.kubeconfig_path,
            &self.config.namespace,
            &self.config.frontend_service,
            polling,
        )
        .await
    }

    /// Delete the storefront resources
    pub async fn remove(&self) -> Result<()> {
        let patched = self.patched_manifest_path();
        let manifest = if patched.exists() {
            patched
        } else {
            self.checkout_dir().join(&self.config.manifest_path)
        };

        if !manifest.exists() {
            warn!(
                "No storefront manifest found at {}, skipping storefront removal",
                manifest.display()
            );
            return Ok(());
        }

        ResourceManager::delete_manifest(&self.kubeconfig_path, &manifest, &self.config.namespace)
            .await
            .context("Failed to remove storefront")?;

        info!("Storefront removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeployConfig;

    fn manager(output: &Path) -> StorefrontManager {
        let config = DeployConfig::example();
        StorefrontManager::new(
            config.storefront,
            output.join("kubeconfig"),
            output.to_path_buf(),
            config.timeouts,
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_repo_dir_name() {
        assert_eq!(
            StorefrontManager::repo_dir_name(
                "https://github.com/GoogleCloudPlatform/microservices-demo.git"
            ),
            "microservices-demo"
        );
        assert_eq!(
            StorefrontManager::repo_dir_name("https://gitlab.example.com/shop/app/"),
            "app"
        );
        assert_eq!(StorefrontManager::repo_dir_name("not a url"), "storefront");
    }

    #[test]
    fn test_output_layout() {
        let manager = manager(Path::new("/tmp/shop"));
        assert_eq!(
            manager.checkout_dir(),
            PathBuf::from("/tmp/shop/microservices-demo")
        );
        assert_eq!(
            manager.patched_manifest_path(),
            PathBuf::from("/tmp/shop/storefront-manifests.yaml")
        );
    }

    #[tokio::test]
    async fn test_prepare_patches_existing_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let checkout = manager.checkout_dir();
        tokio::fs::create_dir_all(checkout.join(".git")).await.unwrap();
        tokio::fs::create_dir_all(checkout.join("release")).await.unwrap();
        tokio::fs::write(
            checkout.join("release/kubernetes-manifests.yaml"),
            "resources:\n  requests:\n    cpu: 100m\n    memory: 128Mi\n",
        )
        .await
        .unwrap();

        let manifest = manager.prepare().await.unwrap();
        let patched = tokio::fs::read_to_string(&manifest).await.unwrap();
        assert_eq!(
            patched,
            "resources:\n  requests:\n    cpu: 50m\n    memory: 64Mi\n"
        );
    }

    #[tokio::test]
    async fn test_prepare_fails_without_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        tokio::fs::create_dir_all(manager.checkout_dir().join(".git"))
            .await
            .unwrap();

        let err = manager.prepare().await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_remove_without_manifest_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        tokio_test::assert_ok!(manager(dir.path()).remove().await);
    }
}
