/// Google Cloud API client implementation
pub mod client;
pub mod cluster;
pub mod models;
pub mod project;

pub use client::GcpClient;
pub use cluster::ClusterManager;
pub use project::ProjectVerifier;
