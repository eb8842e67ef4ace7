/// Kubernetes cluster operations
pub mod client;
pub mod pods;
pub mod resources;

pub use client::KubernetesClient;
pub use pods::PodManager;
pub use resources::ResourceManager;
