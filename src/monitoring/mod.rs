/// Prometheus/Grafana monitoring stack deployment and management
use anyhow::{Context, Result};
use handlebars::Handlebars;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{MonitoringConfig, TimeoutConfig};
use crate::k8s::ResourceManager;
use crate::utils::command::CommandBuilder;
use crate::utils::polling::PollingConfig;

const VALUES_FILE: &str = "monitoring-values.yaml";
const HELM_TIMEOUT: &str = "10m";
const PASSWORD_LENGTH: usize = 20;

const VALUES_TEMPLATE: &str = r#"# Rendered by shopstack for release {{release}}
grafana:
  adminUser: admin
  adminPassword: {{admin_password}}
  service:
    type: ClusterIP
  defaultDashboardsEnabled: true
prometheus:
  prometheusSpec:
    retention: {{retention}}
    serviceMonitorSelectorNilUsesHelmValues: false
    podMonitorSelectorNilUsesHelmValues: false
alertmanager:
  enabled: true
"#;

/// Grafana login details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrafanaCredentials {
    pub user: String,
    pub password: String,
}

/// Monitoring stack manager
pub struct MonitoringManager {
    config: MonitoringConfig,
    kubeconfig_path: PathBuf,
    output_dir: PathBuf,
    timeouts: TimeoutConfig,
    cancel: CancellationToken,
}

impl MonitoringManager {
    /// Create a new monitoring manager
    pub fn new(
        config: MonitoringConfig,
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

    /// Install or upgrade the monitoring chart
    pub async fn install(&self) -> Result<()> {
        info!(
            "Installing {}/{} as release {}...",
            self.config.repo_name, self.config.chart, self.config.release
        );

        self.add_helm_repo().await?;

        let password = self.admin_password().await?;
        let values_path = self.write_values(&password).await?;

        CommandBuilder::new("helm")
            .args(self.install_args(&values_path))
            .kubeconfig(&self.kubeconfig_path)
            .context("Failed to install monitoring chart")
            .run_silent()
            .await?;

        info!("Monitoring stack installed successfully");
        Ok(())
    }

    /// Add the chart repository and refresh indexes
    async fn add_helm_repo(&self) -> Result<()> {
        info!("Adding Helm repository {}...", self.config.repo_name);

        let output = CommandBuilder::new("helm")
            .args(self.repo_add_args())
            .kubeconfig(&self.kubeconfig_path)
            .context("Failed to add Helm repo")
            .output()
            .await?;

        if !output.success {
            // Ignore "already exists" errors
            if !output.stderr.contains("already exists") {
                anyhow::bail!("Failed to add Helm repo: {}", output.stderr);
            }
        }

        CommandBuilder::new("helm")
            .args(self.repo_update_args())
            .kubeconfig(&self.kubeconfig_path)
            .context("Failed to update Helm repos")
            .run_silent()
            .await
    }

    fn repo_add_args(&self) -> [&str; 4] {
        ["repo", "add", &self.config.repo_name, &self.config.repo_url]
    }

    fn repo_update_args(&self) -> [&str; 3] {
        ["repo", "update", &self.config.repo_name]
    }

    fn status_args(&self) -> [&str; 4] {
        ["status", &self.config.release, "--namespace", &self.config.namespace]
    }

    fn uninstall_args(&self) -> [&str; 5] {
        [
            "uninstall",
            &self.config.release,
            "--namespace",
            &self.config.namespace,
            "--wait",
        ]
    }

    /// Arguments for `helm upgrade --install`
    fn install_args(&self, values_path: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "upgrade".into(),
            "--install".into(),
            self.config.release.clone(),
            format!("{}/{}", self.config.repo_name, self.config.chart),
            "--namespace".into(),
            self.config.namespace.clone(),
            "--create-namespace".into(),
            "-f".into(),
            values_path.display().to_string(),
        ];

        if let Some(version) = &self.config.version {
            args.extend(["--version".into(), version.clone()]);
        }

        args.extend(["--wait", "--timeout", HELM_TIMEOUT].map(String::from));
        args
    }

    /// Render the chart values file
    fn render_values(&self, admin_password: &str) -> Result<String> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);

        let data = serde_json::json!({
            "release": self.config.release,
            // JSON strings are valid double-quoted YAML scalars
            "admin_password": serde_json::to_string(admin_password)?,
            "retention": "24h",
        });

        handlebars
            .render_template(VALUES_TEMPLATE, &data)
            .context("Failed to render monitoring values")
    }

    async fn write_values(&self, admin_password: &str) -> Result<PathBuf> {
        let rendered = self.render_values(admin_password)?;

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .context("Failed to create output directory")?;

        let path = self.output_dir.join(VALUES_FILE);

        // Restrict the file before any content lands in it, including one left by an earlier run
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(false);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options
            .open(&path)
            .await
            .context("Failed to open monitoring values file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .await
                .context("Failed to restrict monitoring values permissions")?;
        }

        file.set_len(0)
            .await
            .context("Failed to truncate monitoring values file")?;
        file.write_all(rendered.as_bytes())
            .await
            .context("Failed to write monitoring values")?;
        file.flush()
            .await
            .context("Failed to write monitoring values")?;

        Ok(path)
    }

    /// Configured password, the one already in the release, or a fresh one
    async fn admin_password(&self) -> Result<String> {
        if let Some(password) = &self.config.grafana_admin_password {
            return Ok(password.clone());
        }

        // Grafana only reads the password on first start, so keep the existing one
        let stored = if self.release_exists().await? {
            Some(self.grafana_credentials().await)
        } else {
            None
        };

        self.choose_password(stored)
    }

    /// Pick the password given what an installed release already stores
    fn choose_password(&self, stored: Option<Result<GrafanaCredentials>>) -> Result<String> {
        if let Some(password) = &self.config.grafana_admin_password {
            return Ok(password.clone());
        }

        match stored {
            None => Ok(Self::generate_password()),
            Some(Ok(credentials)) => {
                info!("Reusing existing Grafana admin password");
                Ok(credentials.password)
            }
            Some(Err(e)) => Err(e).with_context(|| {
                format!(
                    "Release {} is installed but its Grafana admin password could not be read; \
                     set monitoring.grafana_admin_password instead of rotating it",
                    self.config.release
                )
            }),
        }
    }

    fn generate_password() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(PASSWORD_LENGTH)
            .map(char::from)
            .collect()
    }

    /// Check whether the Helm release is installed
    pub async fn release_exists(&self) -> Result<bool> {
        let output = CommandBuilder::new("helm")
            .args(self.status_args())
            .kubeconfig(&self.kubeconfig_path)
            .context("Failed to query Helm release")
            .output()
            .await?;

        if output.success {
            Ok(true)
        } else if output.is_not_found() {
            Ok(false)
        } else {
            anyhow::bail!(
                "Failed to query release {}: {}",
                self.config.release,
                output.stderr.trim()
            )
        }
    }

    /// Switch Grafana to a LoadBalancer service and wait for its address
    pub async fn expose_grafana(&self) -> Result<String> {
        ResourceManager::patch_service_type(
            &self.kubeconfig_path,
            &self.config.namespace,
            &self.config.grafana_service,
            "LoadBalancer",
        )
        .await?;

        let polling = PollingConfig::from_settings(
            &self.timeouts.external_ip,
            format!("Waiting for external IP on {}", self.config.grafana_service),
        )
        .cancel_on(&self.cancel);

        ResourceManager::wait_for_external_address(
            &self.kubeconfig_path,
            &self.config.namespace,
            &self.config.grafana_service,
            polling,
        )
        .await
    }

    /// Grafana external address, if assigned
    pub async fn grafana_address(&self) -> Result<Option<String>> {
        ResourceManager::service_external_address(
            &self.kubeconfig_path,
            &self.config.namespace,
            &self.config.grafana_service,
        )
        .await
    }

    /// Read Grafana credentials from the chart's secret
    pub async fn grafana_credentials(&self) -> Result<GrafanaCredentials> {
        // The Grafana subchart names its secret after the service
        let data = ResourceManager::read_secret(
            &self.kubeconfig_path,
            &self.config.namespace,
            &self.config.grafana_service,
        )
        .await?;

        let password = data
            .get("admin-password")
            .cloned()
            .context("Grafana secret has no admin-password")?;
        let user = data
            .get("admin-user")
            .cloned()
            .unwrap_or_else(|| "admin".to_string());

        Ok(GrafanaCredentials { user, password })
    }

    /// Remove the Helm release, doing nothing if it is not installed
    pub async fn uninstall(&self) -> Result<()> {
        if !self.release_exists().await? {
            info!("Release {} not installed, nothing to remove", self.config.release);
            return Ok(());
        }

        info!("Uninstalling release {}...", self.config.release);
        CommandBuilder::new("helm")
            .args(self.uninstall_args())
            .kubeconfig(&self.kubeconfig_path)
            .context("Failed to uninstall monitoring chart")
            .run_silent()
            .await?;

        info!("Monitoring stack removed");
        Ok(())
    }
}
