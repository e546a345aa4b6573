use std::time::Duration;

use async_trait::async_trait;

use crate::error::OrchestratorError;
use crate::port::SessionPorts;

/// Result of a successful [`ClusterDriver::create`] call.
#[derive(Debug, Clone)]
pub struct ClusterHandle {
    pub kubeconfig_path: String,
    pub duration: Duration,
}

/// Owns the lifecycle of single-node Kubernetes-in-container clusters.
///
/// Implementations MUST leave no residue on a failed `create` — attempt
/// `delete` before returning the error — and MUST make `delete` idempotent
/// even against a half-created cluster.
#[async_trait]
pub trait ClusterDriver: Send + Sync {
    /// Render a cluster spec naming `cluster_name`, mapping `6443→api`,
    /// `80→http`, `443→https` onto the given host ports, invoke the external
    /// cluster tool, poll readiness, and emit a kubeconfig whose server URL
    /// has been rewritten from `0.0.0.0` to the loopback address (the
    /// cluster's certificate is issued for loopback only — this coupling
    /// with the Sandbox Driver's network attachment is intentional, see
    /// DESIGN.md).
    async fn create(
        &self,
        cluster_name: &str,
        ports: SessionPorts,
    ) -> Result<ClusterHandle, OrchestratorError>;

    /// Idempotent; must succeed even if the cluster is half-created or
    /// already gone.
    async fn delete(&self, cluster_name: &str) -> Result<(), OrchestratorError>;

    /// Ground-truth enumeration used by the Reaper's sweep loop.
    async fn list(&self) -> Result<Vec<String>, OrchestratorError>;
}
