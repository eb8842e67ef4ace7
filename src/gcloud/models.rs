/// Google Cloud API data models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cloud Resource Manager project
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub project_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub project_number: String,
    pub lifecycle_state: String,
}

impl Project {
    pub fn is_active(&self) -> bool {
        self.lifecycle_state == "ACTIVE"
    }
}

/// GKE cluster resource
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub name: String,
    pub status: ClusterStatus,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub current_master_version: Option<String>,
    #[serde(default)]
    pub current_node_count: Option<u32>,
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub node_pools: Vec<NodePool>,
}

/// Lifecycle state of a GKE cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterStatus {
    StatusUnspecified,
    Provisioning,
    Running,
    Reconciling,
    Stopping,
    Error,
    Degraded,
}

impl ClusterStatus {
    /// Cluster is transitioning and will settle on its own
    pub fn is_transient(&self) -> bool {
        matches!(self, ClusterStatus::Provisioning | ClusterStatus::Reconciling)
    }

    /// Cluster accepts workloads
    pub fn is_usable(&self) -> bool {
        matches!(self, ClusterStatus::Running | ClusterStatus::Degraded)
    }
}

impl std::fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClusterStatus::StatusUnspecified => "STATUS_UNSPECIFIED",
            ClusterStatus::Provisioning => "PROVISIONING",
            ClusterStatus::Running => "RUNNING",
            ClusterStatus::Reconciling => "RECONCILING",
            ClusterStatus::Stopping => "STOPPING",
            ClusterStatus::Error => "ERROR",
            ClusterStatus::Degraded => "DEGRADED",
        };
        write!(f, "{}", s)
    }
}

/// GKE node pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePool {
    pub name: String,
    #[serde(default)]
    pub initial_node_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<NodeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Node pool machine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    pub machine_type: String,
    #[serde(default)]
    pub disk_size_gb: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub oauth_scopes: Vec<String>,
}

/// Long-running GKE operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub operation_type: String,
    pub status: OperationStatus,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub error: Option<StatusDetail>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl Operation {
    /// Error message for a finished operation that failed
    pub fn failure(&self) -> Option<String> {
        if self.status != OperationStatus::Done {
            return None;
        }
        match (&self.error, &self.status_message) {
            (Some(err), _) => Some(format!("{}: {}", err.code, err.message)),
            (None, Some(msg)) if !msg.is_empty() => Some(msg.clone()),
            _ => None,
        }
    }
}

/// Operation progress state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    StatusUnspecified,
    Pending,
    Running,
    Done,
    Aborting,
}

/// `google.rpc.Status` as embedded in operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusDetail {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

/// Google API error envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error details from Google APIs
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    pub code: u16,
    pub message: String,
    #[serde(default)]
    pub status: String,
}

/// Request body for `clusters.create`
#[derive(Debug, Serialize)]
pub struct CreateClusterRequest {
    pub cluster: ClusterSpec,
}

/// Cluster definition sent on creation
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub name: String,
    pub node_pools: Vec<NodePool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_channel: Option<ReleaseChannel>,
    #[serde(skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub resource_labels: std::collections::HashMap<String, String>,
}

/// GKE release channel
#[derive(Debug, Serialize)]
pub struct ReleaseChannel {
    pub channel: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_deserialization() {
        let json = r#"{
            "name": "online-boutique",
            "status": "RUNNING",
            "endpoint": "34.1.2.3",
            "location": "us-central1-a",
            "currentMasterVersion": "1.29.4-gke.1043002",
            "currentNodeCount": 3,
            "createTime": "2024-05-01T10:00:00+00:00",
            "nodePools": [{
                "name": "default-pool",
                "initialNodeCount": 3,
                "config": {"machineType": "e2-standard-2", "diskSizeGb": 50},
                "status": "RUNNING"
            }],
            "selfLink": "ignored"
        }"#;

        let cluster: Cluster = serde_json::from_str(json).unwrap();
        assert_eq!(cluster.status, ClusterStatus::Running);
        assert!(cluster.status.is_usable());
        assert_eq!(cluster.current_node_count, Some(3));
        assert_eq!(cluster.node_pools[0].config.as_ref().unwrap().disk_size_gb, 50);
        assert!(cluster.create_time.is_some());
    }

    #[test]
    fn test_operation_failure_message() {
        let json = r#"{
            "name": "operation-123",
            "operationType": "CREATE_CLUSTER",
            "status": "DONE",
            "error": {"code": 8, "message": "Insufficient regional quota"}
        }"#;
        let op: Operation = serde_json::from_str(json).unwrap();
        assert_eq!(
            op.failure().as_deref(),
            Some("8: Insufficient regional quota")
        );

        let running: Operation =
            serde_json::from_str(r#"{"name": "op", "status": "RUNNING"}"#).unwrap();
        assert!(running.failure().is_none());

        let done: Operation =
            serde_json::from_str(r#"{"name": "op", "status": "DONE", "statusMessage": ""}"#)
                .unwrap();
        assert!(done.failure().is_none());
    }

    #[test]
    fn test_create_request_shape() {
        let request = CreateClusterRequest {
            cluster: ClusterSpec {
                name: "demo".to_string(),
                node_pools: vec![NodePool {
                    name: "default-pool".to_string(),
                    initial_node_count: 2,
                    config: Some(NodeConfig {
                        machine_type: "e2-medium".to_string(),
                        disk_size_gb: 30,
                        oauth_scopes: vec![],
                    }),
                    status: None,
                }],
                release_channel: Some(ReleaseChannel {
                    channel: "STABLE".to_string(),
                }),
                resource_labels: Default::default(),
            },
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["cluster"]["name"], "demo");
        assert_eq!(value["cluster"]["nodePools"][0]["initialNodeCount"], 2);
        assert_eq!(
            value["cluster"]["nodePools"][0]["config"]["machineType"],
            "e2-medium"
        );
        assert_eq!(value["cluster"]["releaseChannel"]["channel"], "STABLE");
        assert!(value["cluster"].get("resourceLabels").is_none());
    }

    #[test]
    fn test_project_state() {
        let project: Project = serde_json::from_str(
            r#"{"projectId": "demo-123", "projectNumber": "42", "lifecycleState": "DELETE_REQUESTED"}"#,
        )
        .unwrap();
        assert!(!project.is_active());
    }
}
