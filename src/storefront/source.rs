/// Storefront source checkout via git
use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::utils::command::CommandBuilder;

/// Manages the local clone of the storefront repository
pub struct RepoManager;

impl RepoManager {
    /// Arguments for a shallow clone of a single branch or tag
    fn clone_args(url: &str, git_ref: &str, destination: &Path) -> Vec<String> {
        vec![
            "clone".to_string(),
            "--depth".to_string(),
            "1".to_string(),
            "--branch".to_string(),
            git_ref.to_string(),
            url.to_string(),
            destination.display().to_string(),
        ]
    }

    /// Clone the repository unless a checkout already exists at `destination`
    pub async fn ensure_checkout(url: &str, git_ref: &str, destination: &Path) -> Result<()> {
        if destination.join(".git").exists() {
            info!(
                "Reusing existing checkout at {}",
                destination.display()
            );
            return Ok(());
        }

        if destination.exists() {
            let mut entries = tokio::fs::read_dir(destination)
                .await
                .with_context(|| format!("Failed to read {}", destination.display()))?;
            if entries.next_entry().await?.is_some() {
                anyhow::bail!(
                    "{} exists and is not a git checkout; remove it or choose another output directory",
                    destination.display()
                );
            }
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create output directory")?;
        }

        info!("Cloning {} ({}) into {}", url, git_ref, destination.display());

        CommandBuilder::new("git")
            .args(Self::clone_args(url, git_ref, destination))
            .context("Failed to clone storefront repository")
            .run_silent()
            .await?;

        info!("Repository cloned successfully");
        Ok(())
    }

    /// Commit currently checked out
    pub async fn head_revision(checkout: &Path) -> Result<String> {
        let stdout = CommandBuilder::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(checkout)
            .context("Failed to read checkout revision")
            .run()
            .await?;
        Ok(stdout.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_args() {
        let args = RepoManager::clone_args(
            "https://github.com/GoogleCloudPlatform/microservices-demo.git",
            "v0.10.0",
            Path::new("output/microservices-demo"),
        );
        assert_eq!(
            args,
            vec![
                "clone",
                "--depth",
                "1",
                "--branch",
                "v0.10.0",
                "https://github.com/GoogleCloudPlatform/microservices-demo.git",
                "output/microservices-demo",
            ]
        );
    }

    #[tokio::test]
    async fn test_existing_checkout_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join(".git")).await.unwrap();

        // An unreachable URL proves no clone is attempted
        let result =
            RepoManager::ensure_checkout("https://invalid.invalid/repo.git", "main", dir.path())
                .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_non_empty_foreign_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), "hello").await.unwrap();

        let err = RepoManager::ensure_checkout("https://invalid.invalid/repo.git", "main", dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a git checkout"));
    }
}
