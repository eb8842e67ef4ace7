/// Generic Kubernetes resource operations
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::utils::command::CommandBuilder;
use crate::utils::polling::PollingConfig;

/// Subset of a Service object needed to find its external address
#[derive(Debug, Deserialize)]
struct ServiceObject {
    #[serde(default)]
    spec: ServiceSpec,
    #[serde(default)]
    status: ServiceStatus,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceSpec {
    #[serde(rename = "type", default)]
    service_type: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceStatus {
    #[serde(default)]
    load_balancer: LoadBalancerStatus,
}

#[derive(Debug, Default, Deserialize)]
struct LoadBalancerStatus {
    #[serde(default)]
    ingress: Vec<LoadBalancerIngress>,
}

#[derive(Debug, Deserialize)]
struct LoadBalancerIngress {
    ip: Option<String>,
    hostname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SecretObject {
    #[serde(default)]
    data: HashMap<String, String>,
}

/// Generic Kubernetes resource management
pub struct ResourceManager;

impl ResourceManager {
    /// Create the namespace unless it already exists
    pub async fn ensure_namespace(kubeconfig_path: &Path, namespace: &str) -> Result<()> {
        let existing = CommandBuilder::new("kubectl")
            .args(["get", "namespace", namespace])
            .kubeconfig(kubeconfig_path)
            .context("Failed to check namespace")
            .output()
            .await?;

        if existing.success {
            return Ok(());
        }
        if !existing.is_not_found() {
            anyhow::bail!("Failed to check namespace {}: {}", namespace, existing.stderr);
        }

        info!("Creating namespace: {}", namespace);
        CommandBuilder::new("kubectl")
            .args(["create", "namespace", namespace])
            .kubeconfig(kubeconfig_path)
            .context("Failed to create namespace")
            .run_silent()
            .await
    }

    /// Arguments for `kubectl apply`
    fn apply_args(manifest_path: &Path, namespace: &str) -> Vec<String> {
        vec![
            "apply".to_string(),
            "-n".to_string(),
            namespace.to_string(),
            "-f".to_string(),
            manifest_path.display().to_string(),
        ]
    }

    /// Arguments for `kubectl delete`, tolerating objects that are already gone
    fn delete_args(manifest_path: &Path, namespace: &str) -> Vec<String> {
        vec![
            "delete".to_string(),
            "--ignore-not-found".to_string(),
            "-n".to_string(),
            namespace.to_string(),
            "-f".to_string(),
            manifest_path.display().to_string(),
        ]
    }

    fn patch_service_args(namespace: &str, service: &str, service_type: &str) -> Vec<String> {
        vec![
            "patch".to_string(),
            "service".to_string(),
            service.to_string(),
            "-n".to_string(),
            namespace.to_string(),
            "-p".to_string(),
            Self::service_type_patch(service_type),
        ]
    }

    /// Apply a Kubernetes manifest file
    pub async fn apply_manifest(
        kubeconfig_path: &Path,
        manifest_path: &Path,
        namespace: &str,
    ) -> Result<()> {
        info!(
            "Applying Kubernetes manifest: {} (namespace {})",
            manifest_path.display(),
            namespace
        );

        let stdout = CommandBuilder::new("kubectl")
            .args(Self::apply_args(manifest_path, namespace))
            .kubeconfig(kubeconfig_path)
            .context("Failed to apply manifest")
            .run()
            .await?;

        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            info!("  {}", line.trim());
        }

        Ok(())
    }

    /// Delete everything a manifest describes, ignoring objects already gone
    pub async fn delete_manifest(
        kubeconfig_path: &Path,
        manifest_path: &Path,
        namespace: &str,
    ) -> Result<()> {
        info!("Deleting resources from manifest: {}", manifest_path.display());

        CommandBuilder::new("kubectl")
            .args(Self::delete_args(manifest_path, namespace))
            .kubeconfig(kubeconfig_path)
            .context("Failed to delete manifest resources")
            .run_silent()
            .await
    }

    /// Merge patch body that switches a service's type
    fn service_type_patch(service_type: &str) -> String {
        serde_json::json!({ "spec": { "type": service_type } }).to_string()
    }

    /// Change a service's type, e.g. to LoadBalancer
    pub async fn patch_service_type(
        kubeconfig_path: &Path,
        namespace: &str,
        service: &str,
        service_type: &str,
    ) -> Result<()> {
        info!(
            "Patching service {}/{} to type {}",
            namespace, service, service_type
        );

        CommandBuilder::new("kubectl")
            .args(Self::patch_service_args(namespace, service, service_type))
            .kubeconfig(kubeconfig_path)
            .context(format!("Failed to patch service {}", service))
            .run_silent()
            .await
    }

    /// Service type and first load balancer address from `kubectl get svc -o json`
    fn parse_service(json: &str) -> Result<(String, Option<String>)> {
        let service: ServiceObject =
            serde_json::from_str(json).context("Failed to parse service JSON")?;
        let address = service
            .status
            .load_balancer
            .ingress
            .into_iter()
            .find_map(|ingress| {
                ingress
                    .ip
                    .filter(|ip| !ip.is_empty())
                    .or(ingress.hostname.filter(|h| !h.is_empty()))
            });
        Ok((service.spec.service_type, address))
    }

    /// External IP or hostname of a LoadBalancer service, if assigned yet
    pub async fn service_external_address(
        kubeconfig_path: &Path,
        namespace: &str,
        service: &str,
    ) -> Result<Option<String>> {
        let stdout = CommandBuilder::new("kubectl")
            .args(["get", "service", service, "-n", namespace, "-o", "json"])
            .kubeconfig(kubeconfig_path)
            .context(format!("Failed to get service {}", service))
            .run()
            .await?;

        let (service_type, address) = Self::parse_service(&stdout)?;
        if service_type != "LoadBalancer" {
            anyhow::bail!(
                "Service {}/{} is of type {}, not LoadBalancer",
                namespace,
                service,
                service_type
            );
        }
        Ok(address)
    }

    /// Poll until the service has an external address
    pub async fn wait_for_external_address(
        kubeconfig_path: &Path,
        namespace: &str,
        service: &str,
        polling: PollingConfig,
    ) -> Result<String> {
        polling
            .poll(|| Self::service_external_address(kubeconfig_path, namespace, service))
            .await
    }

    /// Decode the string values of a secret's data map
    fn decode_secret(json: &str) -> Result<HashMap<String, String>> {
        let secret: SecretObject =
            serde_json::from_str(json).context("Failed to parse secret JSON")?;

        secret
            .data
            .into_iter()
            .map(|(key, value)| {
                let bytes = STANDARD
                    .decode(value.trim())
                    .with_context(|| format!("Secret key {} is not valid base64", key))?;
                let text = String::from_utf8(bytes)
                    .with_context(|| format!("Secret key {} is not UTF-8", key))?;
                Ok((key, text))
            })
            .collect()
    }

    /// Read and decode all keys of a secret
    pub async fn read_secret(
        kubeconfig_path: &Path,
        namespace: &str,
        name: &str,
    ) -> Result<HashMap<String, String>> {
        let stdout = CommandBuilder::new("kubectl")
            .args(["get", "secret", name, "-n", namespace, "-o", "json"])
            .kubeconfig(kubeconfig_path)
            .context(format!("Failed to read secret {}", name))
            .run()
            .await?;

        Self::decode_secret(&stdout)
    }
}
