/// Configuration management for Shopstack - storefront on GKE with Prometheus
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::utils::command::CommandBuilder;

/// Upper bound for `storefront.resources.scale`
const MAX_RESOURCE_SCALE: f64 = 100.0;

/// Main deployment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Google Cloud project and location
    pub gcp: GcpConfig,

    /// GKE cluster shape
    pub cluster: ClusterConfig,

    /// Storefront application source and deployment
    pub storefront: StorefrontConfig,

    /// Monitoring Helm chart
    pub monitoring: MonitoringConfig,

    /// Readiness polling limits
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Google Cloud project configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpConfig {
    /// Project ID (can also be set via GOOGLE_CLOUD_PROJECT or gcloud config)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    /// Compute zone for the zonal cluster (e.g., "us-central1-a")
    pub zone: String,

    /// OAuth access token (can also be set via GOOGLE_OAUTH_ACCESS_TOKEN)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

/// GKE cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster name
    pub name: String,

    /// Node machine type (e.g., "e2-standard-2")
    pub machine_type: String,

    /// Number of nodes in the default pool
    #[serde(default = "default_num_nodes")]
    pub num_nodes: u32,

    /// Boot disk size per node
    #[serde(default = "default_disk_size")]
    pub disk_size_gb: u32,

    /// GKE release channel ("RAPID", "REGULAR", "STABLE")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_channel: Option<String>,
}

/// Storefront application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorefrontConfig {
    /// Git repository containing the manifests
    pub repo_url: String,

    /// Branch or tag to check out
    #[serde(default = "default_git_ref")]
    pub git_ref: String,

    /// Manifest path relative to the repository root
    pub manifest_path: String,

    /// Namespace the manifests are applied to
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Number of ready pods that marks the storefront as up
    pub expected_pods: u32,

    /// LoadBalancer service fronting the storefront
    #[serde(default = "default_frontend_service")]
    pub frontend_service: String,

    /// CPU/memory substitutions applied to the manifest before deploying
    #[serde(default)]
    pub resources: ResourcePatchConfig,
}

/// Resource request/limit substitutions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcePatchConfig {
    /// Fixed values for `resources.requests`
    #[serde(default)]
    pub requests: ResourceValues,

    /// Fixed values for `resources.limits`
    #[serde(default)]
    pub limits: ResourceValues,

    /// Multiply every value without a fixed override by this factor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,

    /// Lower bound for scaled CPU values
    #[serde(default = "default_min_cpu_millis")]
    pub min_cpu_millis: u64,

    /// Lower bound for scaled memory values
    #[serde(default = "default_min_memory_mib")]
    pub min_memory_mib: u64,
}

impl Default for ResourcePatchConfig {
    fn default() -> Self {
        Self {
            requests: ResourceValues::default(),
            limits: ResourceValues::default(),
            scale: None,
            min_cpu_millis: default_min_cpu_millis(),
            min_memory_mib: default_min_memory_mib(),
        }
    }
}

/// CPU/memory quantity pair, each optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceValues {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Monitoring stack configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Local name for the Helm repository
    pub repo_name: String,

    /// Helm repository URL
    pub repo_url: String,

    /// Chart name within the repository
    pub chart: String,

    /// Chart version (latest if unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Helm release name
    pub release: String,

    /// Namespace for the release
    pub namespace: String,

    /// Grafana service name created by the chart
    pub grafana_service: String,

    /// Grafana admin password (generated if unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grafana_admin_password: Option<String>,
}

/// Timeouts for the readiness loops
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_pods_ready")]
    pub pods_ready: PollSettings,

    #[serde(default = "default_external_ip")]
    pub external_ip: PollSettings,

    #[serde(default = "default_cluster_operation")]
    pub cluster_operation: PollSettings,
}

/// Fixed-interval poll limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    pub timeout_secs: u64,
    pub interval_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            pods_ready: default_pods_ready(),
            external_ip: default_external_ip(),
            cluster_operation: default_cluster_operation(),
        }
    }
}

fn default_num_nodes() -> u32 {
    3
}

fn default_disk_size() -> u32 {
    50
}

fn default_git_ref() -> String {
    "main".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_frontend_service() -> String {
    "frontend-external".to_string()
}

fn default_min_cpu_millis() -> u64 {
    10
}

fn default_min_memory_mib() -> u64 {
    16
}

fn default_pods_ready() -> PollSettings {
    PollSettings {
        timeout_secs: 300,
        interval_secs: 10,
    }
}

fn default_external_ip() -> PollSettings {
    PollSettings {
        timeout_secs: 180,
        interval_secs: 5,
    }
}

fn default_cluster_operation() -> PollSettings {
    PollSettings {
        timeout_secs: 900,
        interval_secs: 15,
    }
}

impl DeployConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: DeployConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let names = [
            ("cluster.name", &self.cluster.name),
            ("cluster.machine_type", &self.cluster.machine_type),
            ("storefront.git_ref", &self.storefront.git_ref),
            ("storefront.manifest_path", &self.storefront.manifest_path),
            ("storefront.namespace", &self.storefront.namespace),
            ("storefront.frontend_service", &self.storefront.frontend_service),
            ("monitoring.repo_name", &self.monitoring.repo_name),
            ("monitoring.chart", &self.monitoring.chart),
            ("monitoring.release", &self.monitoring.release),
            ("monitoring.namespace", &self.monitoring.namespace),
            ("monitoring.grafana_service", &self.monitoring.grafana_service),
        ];
        for (field, value) in names {
            if value.trim().is_empty() {
                anyhow::bail!("{} cannot be empty", field);
            }
        }

        if self.cluster.num_nodes == 0 {
            anyhow::bail!("cluster.num_nodes must be at least 1");
        }

        Self::validate_zone(&self.gcp.zone)?;

        if self.storefront.expected_pods == 0 {
            anyhow::bail!("storefront.expected_pods must be at least 1");
        }

        if let Some(scale) = self.storefront.resources.scale {
            if !(scale > 0.0 && scale <= MAX_RESOURCE_SCALE) {
                anyhow::bail!(
                    "storefront.resources.scale must be greater than 0 and at most {}",
                    MAX_RESOURCE_SCALE
                );
            }
        }

        Self::validate_url("storefront.repo_url", &self.storefront.repo_url)?;
        Self::validate_url("monitoring.repo_url", &self.monitoring.repo_url)?;

        Self::validate_poll("timeouts.pods_ready", &self.timeouts.pods_ready)?;
        Self::validate_poll("timeouts.external_ip", &self.timeouts.external_ip)?;
        Self::validate_poll(
            "timeouts.cluster_operation",
            &self.timeouts.cluster_operation,
        )?;

        Ok(())
    }

    /// Zones look like `<region>-<zone letter>`, e.g. `us-central1-a`
    fn validate_zone(zone: &str) -> anyhow::Result<()> {
        let mut parts = zone.rsplitn(2, '-');
        match (parts.next(), parts.next()) {
            (Some(letter), Some(region))
                if letter.len() == 1
                    && letter.chars().all(|c| c.is_ascii_lowercase())
                    && region.contains('-') =>
            {
                Ok(())
            }
            _ => anyhow::bail!("Invalid zone: {}", zone),
        }
    }

    fn validate_url(field: &str, value: &str) -> anyhow::Result<()> {
        url::Url::parse(value).with_context(|| format!("{} is not a valid URL: {}", field, value))?;
        Ok(())
    }

    fn validate_poll(field: &str, settings: &PollSettings) -> anyhow::Result<()> {
        if settings.interval_secs == 0 {
            anyhow::bail!("{}.interval_secs must be greater than zero", field);
        }
        if settings.interval_secs > settings.timeout_secs {
            anyhow::bail!("{}.interval_secs cannot exceed timeout_secs", field);
        }
        Ok(())
    }

    /// Region the zone belongs to
    pub fn region(&self) -> &str {
        self.gcp
            .zone
            .rsplit_once('-')
            .map(|(region, _)| region)
            .unwrap_or(&self.gcp.zone)
    }

    /// Resolve the project ID from config, environment or the gcloud default
    pub async fn resolve_project_id(&self) -> anyhow::Result<String> {
        if let Some(project) = Self::project_from_env(
            self.gcp.project_id.as_deref(),
            |key| std::env::var(key).ok(),
        ) {
            return Ok(project);
        }

        let stdout = CommandBuilder::new("gcloud")
            .args(["config", "get-value", "project"])
            .context("Failed to read gcloud default project")
            .run()
            .await?;

        non_empty(stdout.trim()).ok_or_else(|| {
            anyhow::anyhow!(
                "Google Cloud project not found. Set gcp.project_id, GOOGLE_CLOUD_PROJECT, or run `gcloud config set project <id>`"
            )
        })
    }

    /// Configured project first, then the environment variables gcloud itself honours
    fn project_from_env<F>(configured: Option<&str>, lookup: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        configured
            .and_then(non_empty)
            .or_else(|| lookup("GOOGLE_CLOUD_PROJECT").as_deref().and_then(non_empty))
            .or_else(|| lookup("CLOUDSDK_CORE_PROJECT").as_deref().and_then(non_empty))
    }

    /// Get an OAuth access token from config, environment or gcloud
    pub async fn resolve_access_token(&self) -> anyhow::Result<String> {
        if let Some(token) = self
            .gcp
            .access_token
            .as_deref()
            .and_then(non_empty)
            .or_else(|| {
                std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN")
                    .ok()
                    .as_deref()
                    .and_then(non_empty)
            })
        {
            return Ok(token);
        }

        let stdout = CommandBuilder::new("gcloud")
            .args(["auth", "print-access-token"])
            .context("Failed to obtain access token. Run `gcloud auth login` first")
            .run()
            .await?;

        non_empty(stdout.trim())
            .ok_or_else(|| anyhow::anyhow!("gcloud returned an empty access token"))
    }

    /// Generate an example configuration file
    pub fn example() -> Self {
        Self {
            gcp: GcpConfig {
                project_id: None,
                zone: "us-central1-a".to_string(),
                access_token: None,
            },
            cluster: ClusterConfig {
                name: "online-boutique".to_string(),
                machine_type: "e2-standard-2".to_string(),
                num_nodes: 3,
                disk_size_gb: 50,
                release_channel: Some("REGULAR".to_string()),
            },
            storefront: StorefrontConfig {
                repo_url: "https://github.com/GoogleCloudPlatform/microservices-demo.git"
                    .to_string(),
                git_ref: "main".to_string(),
                manifest_path: "release/kubernetes-manifests.yaml".to_string(),
                namespace: "default".to_string(),
                expected_pods: 12,
                frontend_service: "frontend-external".to_string(),
                resources: ResourcePatchConfig {
                    requests: ResourceValues {
                        cpu: Some("50m".to_string()),
                        memory: Some("64Mi".to_string()),
                    },
                    limits: ResourceValues::default(),
                    scale: None,
                    min_cpu_millis: default_min_cpu_millis(),
                    min_memory_mib: default_min_memory_mib(),
                },
            },
            monitoring: MonitoringConfig {
                repo_name: "prometheus-community".to_string(),
                repo_url: "https://prometheus-community.github.io/helm-charts".to_string(),
                chart: "kube-prometheus-stack".to_string(),
                version: None,
                release: "prometheus".to_string(),
                namespace: "monitoring".to_string(),
                grafana_service: "prometheus-grafana".to_string(),
                grafana_admin_password: None,
            },
            timeouts: TimeoutConfig::default(),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value == "(unset)" {
        None
    } else {
        Some(value.to_string())
    }
}
