/// Project verification through Cloud Resource Manager
use anyhow::{Context, Result};
use tracing::info;

use super::client::{GcpClient, GcpError};
use super::models::Project;

/// Verifies the target project before anything is provisioned in it
pub struct ProjectVerifier {
    client: GcpClient,
}

impl ProjectVerifier {
    pub fn new(client: GcpClient) -> Self {
        Self { client }
    }

    /// Fail unless the project exists, is visible to the caller and is ACTIVE
    pub async fn verify(&self, project_id: &str) -> Result<Project> {
        info!("Verifying project: {}", project_id);

        let project = match self.client.get_project(project_id).await {
            Ok(project) => project,
            Err(e) if matches!(e.downcast_ref::<GcpError>(), Some(GcpError::NotFound(_))) => {
                anyhow::bail!("Project {} does not exist or is not accessible", project_id)
            }
            Err(e) => return Err(e).context("Failed to look up project"),
        };

        Self::check_active(&project)?;

        info!(
            "✓ Project {} \"{}\" ({}) is active",
            project.project_id, project.name, project.project_number
        );

        Ok(project)
    }

    fn check_active(project: &Project) -> Result<()> {
        if !project.is_active() {
            anyhow::bail!(
                "Project {} is not active (state: {})",
                project.project_id,
                project.lifecycle_state
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(state: &str) -> Project {
        Project {
            project_id: "demo-123".to_string(),
            name: "Demo".to_string(),
            project_number: "42".to_string(),
            lifecycle_state: state.to_string(),
        }
    }

    #[test]
    fn test_active_project_passes() {
        assert!(ProjectVerifier::check_active(&project("ACTIVE")).is_ok());
    }

    #[test]
    fn test_pending_deletion_fails() {
        let err = ProjectVerifier::check_active(&project("DELETE_REQUESTED")).unwrap_err();
        assert!(err.to_string().contains("DELETE_REQUESTED"));
    }

    #[tokio::test]
    #[ignore] // Requires Google Cloud credentials
    async fn test_verify_live_project() {
        let token = std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN").expect("token not set");
        let project = std::env::var("GOOGLE_CLOUD_PROJECT").expect("project not set");
        let verifier = ProjectVerifier::new(GcpClient::new(token).unwrap());
        verifier.verify(&project).await.unwrap();
    }
}
