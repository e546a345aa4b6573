use std::collections::HashSet;

use async_trait::async_trait;
use ckadlab_core::{
    ClusterDriver, ClusterHandle, ErrorKind, OrchestratorError, PtyStream, ResourceCaps, SandboxDriver,
    SandboxHandle, SessionPorts,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

/// In-memory `ClusterDriver` for exercising Session Manager orchestration
/// logic without an external cluster tool (§A.4/§B.1, OQ-3).
#[derive(Default)]
pub struct FakeClusterDriver {
    clusters: Mutex<HashSet<String>>,
    pub fail_create: Mutex<bool>,
}

impl FakeClusterDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClusterDriver for FakeClusterDriver {
    async fn create(
        &self,
        cluster_name: &str,
        _ports: SessionPorts,
    ) -> Result<ClusterHandle, OrchestratorError> {
        if *self.fail_create.lock() {
            return Err(OrchestratorError::provisioning(
                ckadlab_core::ProvisioningStage::Cluster,
                "fake cluster create failure",
            ));
        }
        self.clusters.lock().insert(cluster_name.to_string());
        Ok(ClusterHandle {
            kubeconfig_path: format!("/tmp/{cluster_name}/kubeconfig"),
            duration: std::time::Duration::from_millis(1),
        })
    }

    async fn delete(&self, cluster_name: &str) -> Result<(), OrchestratorError> {
        self.clusters.lock().remove(cluster_name);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, OrchestratorError> {
        Ok(self.clusters.lock().iter().cloned().collect())
    }
}

/// In-memory `SandboxDriver` counterpart to [`FakeClusterDriver`]. PTYs are
/// loopback-free stubs: reads return EOF, writes are discarded — orchestration
/// tests assert on lifecycle calls, not on terminal byte content.
#[derive(Default)]
pub struct FakeSandboxDriver {
    sandboxes: Mutex<HashSet<String>>,
    pub fail_create: Mutex<bool>,
}

impl FakeSandboxDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SandboxDriver for FakeSandboxDriver {
    async fn create(
        &self,
        cluster_name: &str,
        _kubeconfig_path: &str,
        _caps: ResourceCaps,
    ) -> Result<SandboxHandle, OrchestratorError> {
        if *self.fail_create.lock() {
            return Err(OrchestratorError::provisioning(
                ckadlab_core::ProvisioningStage::Sandbox,
                "fake sandbox create failure",
            ));
        }
        let handle = SandboxHandle(format!("{cluster_name}-sandbox"));
        self.sandboxes.lock().insert(handle.0.clone());
        Ok(handle)
    }

    async fn remove(&self, handle: &SandboxHandle) -> Result<(), OrchestratorError> {
        self.sandboxes.lock().remove(&handle.0);
        Ok(())
    }

    async fn open_pty(
        &self,
        _handle: &SandboxHandle,
        _cols: u16,
        _rows: u16,
    ) -> Result<PtyStream, OrchestratorError> {
        let (resize_tx, _resize_rx) = mpsc::channel(1);
        let (exit_tx, exit_rx) = oneshot::channel::<i32>();
        drop(exit_tx);
        Ok(PtyStream {
            reader: Box::new(tokio::io::empty()),
            writer: Box::new(tokio::io::sink()),
            resize_tx,
            exit_code: exit_rx,
        })
    }

    async fn list(&self) -> Result<Vec<SandboxHandle>, OrchestratorError> {
        Ok(self.sandboxes.lock().iter().cloned().map(SandboxHandle).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports() -> SessionPorts {
        SessionPorts {
            api_port: 30000,
            http_port: 40000,
            https_port: 45000,
        }
    }

    #[tokio::test]
    async fn cluster_lifecycle_round_trips() {
        let driver = FakeClusterDriver::new();
        driver.create("ckad-test1", ports()).await.unwrap();
        assert_eq!(driver.list().await.unwrap(), vec!["ckad-test1".to_string()]);
        driver.delete("ckad-test1").await.unwrap();
        assert!(driver.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sandbox_lifecycle_round_trips() {
        let driver = FakeSandboxDriver::new();
        let handle = driver.create("ckad-test1", "/tmp/kubeconfig", ResourceCaps { memory_mib: 512, cpu: 0.5, pid_max: 100 }).await.unwrap();
        assert_eq!(driver.list().await.unwrap(), vec![handle.clone()]);
        driver.remove(&handle).await.unwrap();
        assert!(driver.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_failure_surfaces_provisioning_error() {
        let driver = FakeClusterDriver::new();
        *driver.fail_create.lock() = true;
        let err = driver.create("ckad-test2", ports()).await.unwrap_err();
        assert!(matches!(err.kind(), ckadlab_core::ErrorKind::Provisioning { .. }));
    }
}
