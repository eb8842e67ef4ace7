/// Google Cloud REST API client
use anyhow::{Context, Result};
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::models::*;

const CONTAINER_API_BASE: &str = "https://container.googleapis.com/v1";
const RESOURCE_MANAGER_API_BASE: &str = "https://cloudresourcemanager.googleapis.com/v1";

/// Typed API failures callers branch on
#[derive(Debug, thiserror::Error)]
pub enum GcpError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("API error: {code} {status} - {message}")]
    Api {
        code: u16,
        status: String,
        message: String,
    },
}

/// Client for the GKE and Cloud Resource Manager APIs
#[derive(Clone)]
pub struct GcpClient {
    client: Client,
    container_base: String,
    resource_manager_base: String,
}

impl GcpClient {
    /// Create a new client authenticated with an OAuth access token
    pub fn new(access_token: String) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", access_token))
                .context("Invalid access token format")?,
        );
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            container_base: CONTAINER_API_BASE.to_string(),
            resource_manager_base: RESOURCE_MANAGER_API_BASE.to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send GET request")?;

        Self::handle_response(url, response).await
    }

    async fn post<T: Serialize, R: DeserializeOwned>(&self, url: &str, body: &T) -> Result<R> {
        debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send POST request")?;

        Self::handle_response(url, response).await
    }

    async fn delete<R: DeserializeOwned>(&self, url: &str) -> Result<R> {
        debug!("DELETE {}", url);

        let response = self
            .client
            .delete(url)
            .send()
            .await
            .context("Failed to send DELETE request")?;

        Self::handle_response(url, response).await
    }

    /// Handle API response, mapping Google error envelopes to `GcpError`
    async fn handle_response<T: DeserializeOwned>(
        url: &str,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            return response
                .json::<T>()
                .await
                .context("Failed to parse API response");
        }

        let error_text = response.text().await.unwrap_or_default();
        Err(Self::error_from_body(url, status, &error_text).into())
    }

    fn error_from_body(url: &str, status: StatusCode, body: &str) -> GcpError {
        if status == StatusCode::NOT_FOUND {
            return GcpError::NotFound(url.to_string());
        }

        match serde_json::from_str::<ErrorResponse>(body) {
            Ok(envelope) => GcpError::Api {
                code: envelope.error.code,
                status: envelope.error.status,
                message: envelope.error.message,
            },
            Err(_) => GcpError::Api {
                code: status.as_u16(),
                status: status.canonical_reason().unwrap_or_default().to_string(),
                message: body.to_string(),
            },
        }
    }

    fn zone_path(&self, project_id: &str, zone: &str) -> String {
        format!(
            "{}/projects/{}/locations/{}",
            self.container_base, project_id, zone
        )
    }

    /// Get a project
    pub async fn get_project(&self, project_id: &str) -> Result<Project> {
        self.get(&format!(
            "{}/projects/{}",
            self.resource_manager_base, project_id
        ))
        .await
    }

    /// Get a cluster, `None` if it does not exist
    pub async fn get_cluster(
        &self,
        project_id: &str,
        zone: &str,
        name: &str,
    ) -> Result<Option<Cluster>> {
        let url = format!("{}/clusters/{}", self.zone_path(project_id, zone), name);
        match self.get::<Cluster>(&url).await {
            Ok(cluster) => Ok(Some(cluster)),
            Err(e) if matches!(e.downcast_ref::<GcpError>(), Some(GcpError::NotFound(_))) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Create a cluster, returning the long-running operation
    pub async fn create_cluster(
        &self,
        project_id: &str,
        zone: &str,
        request: &CreateClusterRequest,
    ) -> Result<Operation> {
        let url = format!("{}/clusters", self.zone_path(project_id, zone));
        self.post(&url, request).await
    }

    /// Delete a cluster, returning the long-running operation
    pub async fn delete_cluster(&self, project_id: &str, zone: &str, name: &str) -> Result<Operation> {
        let url = format!("{}/clusters/{}", self.zone_path(project_id, zone), name);
        self.delete(&url).await
    }

    /// Get operation status
    pub async fn get_operation(
        &self,
        project_id: &str,
        zone: &str,
        operation: &str,
    ) -> Result<Operation> {
        let url = format!(
            "{}/operations/{}",
            self.zone_path(project_id, zone),
            operation
        );
        self.get(&url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let result = GcpClient::new("test-token".to_string());
        assert!(result.is_ok());
    }

    #[test]
    fn test_invalid_token_rejected() {
        let result = GcpClient::new("bad\ntoken".to_string());
        assert!(result.is_err());
    }

    #[test]
    fn test_zone_path() {
        let client = GcpClient::new("t".to_string()).unwrap();
        assert_eq!(
            client.zone_path("demo-123", "us-central1-a"),
            "https://container.googleapis.com/v1/projects/demo-123/locations/us-central1-a"
        );
    }

    #[test]
    fn test_error_envelope_parsing() {
        let body = r#"{"error": {"code": 403, "message": "Kubernetes Engine API has not been used", "status": "PERMISSION_DENIED"}}"#;
        let err = GcpClient::error_from_body("u", StatusCode::FORBIDDEN, body);
        match err {
            GcpError::Api { code, status, message } => {
                assert_eq!(code, 403);
                assert_eq!(status, "PERMISSION_DENIED");
                assert!(message.contains("Kubernetes Engine API"));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_not_found_and_plain_errors() {
        assert!(matches!(
            GcpClient::error_from_body("u", StatusCode::NOT_FOUND, ""),
            GcpError::NotFound(_)
        ));

        match GcpClient::error_from_body("u", StatusCode::BAD_GATEWAY, "upstream down") {
            GcpError::Api { code, message, .. } => {
                assert_eq!(code, 502);
                assert_eq!(message, "upstream down");
            }
            other => panic!("unexpected: {other}"),
        }
    }
}
