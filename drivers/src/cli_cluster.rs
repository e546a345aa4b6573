use std::time::{Duration, Instant};

use ckadlab_core::{ClusterDriver, ClusterHandle, ErrorKind, OrchestratorError, ProvisioningStage, SessionPorts};
use tokio::process::Command;
use tracing::{info, warn};

/// Shells out to `kind` (Kubernetes-in-Docker) to create single-node
/// clusters. One cluster per session, named after the session's
/// `cluster_name`.
pub struct CliClusterDriver {
    work_dir: String,
    readiness_poll_interval: Duration,
    readiness_timeout: Duration,
    /// Docker network `kind` should join the cluster's containers to, so the
    /// sandbox (joined to the same network by `CliSandboxDriver`) can reach
    /// the cluster's control plane (§4.3).
    network_name: String,
}

impl CliClusterDriver {
    pub fn new(work_dir: String, readiness_poll_interval: Duration, network_name: String) -> Self {
        Self {
            work_dir,
            readiness_poll_interval,
            readiness_timeout: Duration::from_secs(120),
            network_name,
        }
    }

    fn kubeconfig_path(&self, cluster_name: &str) -> String {
        format!("{}/{cluster_name}/kubeconfig", self.work_dir)
    }

    fn config_path(&self, cluster_name: &str) -> String {
        format!("{}/{cluster_name}/kind-config.yaml", self.work_dir)
    }

    fn render_config(&self, ports: SessionPorts) -> String {
        format!(
            r#"kind: Cluster
apiVersion: kind.x-k8s.io/v1alpha4
networking:
  apiServerAddress: "0.0.0.0"
  apiServerPort: {api_port}
nodes:
  - role: control-plane
    extraPortMappings:
      - containerPort: 80
        hostPort: {http_port}
        protocol: TCP
      - containerPort: 443
        hostPort: {https_port}
        protocol: TCP
    kubeadmConfigPatches:
      - |
        kind: KubeletConfiguration
        systemReserved:
          memory: 256Mi
        evictionHard:
          memory.available: 100Mi
"#,
            api_port = ports.api_port,
            http_port = ports.http_port,
            https_port = ports.https_port,
        )
    }

    async fn poll_readiness(&self, kubeconfig_path: &str) -> Result<(), OrchestratorError> {
        let deadline = Instant::now() + self.readiness_timeout;
        loop {
            if Instant::now() > deadline {
                return Err(OrchestratorError::provisioning(
                    ProvisioningStage::Readiness,
                    "cluster did not become ready within the timeout",
                ));
            }

            let control_plane_ready = Command::new("kubectl")
                .args(["--kubeconfig", kubeconfig_path, "get", "nodes", "-o", "jsonpath={.items[0].status.conditions[?(@.type=='Ready')].status}"])
                .output()
                .await
                .map(|out| String::from_utf8_lossy(&out.stdout).trim() == "True")
                .unwrap_or(false);

            let system_pods_running = Command::new("kubectl")
                .args([
                    "--kubeconfig",
                    kubeconfig_path,
                    "get",
                    "pods",
                    "-n",
                    "kube-system",
                    "--field-selector=status.phase=Running",
                    "-o",
                    "name",
                ])
                .output()
                .await
                .map(|out| String::from_utf8_lossy(&out.stdout).lines().count() >= 3)
                .unwrap_or(false);

            if control_plane_ready && system_pods_running {
                return Ok(());
            }

            tokio::time::sleep(self.readiness_poll_interval).await;
        }
    }

    fn rewrite_kubeconfig_server(raw: &str) -> String {
        raw.replace("https://0.0.0.0:", "https://127.0.0.1:")
    }
}

#[async_trait::async_trait]
impl ClusterDriver for CliClusterDriver {
    async fn create(
        &self,
        cluster_name: &str,
        ports: SessionPorts,
    ) -> Result<ClusterHandle, OrchestratorError> {
        let start = Instant::now();
        let cluster_dir = format!("{}/{cluster_name}", self.work_dir);
        tokio::fs::create_dir_all(&cluster_dir)
            .await
            .map_err(OrchestratorError::internal)?;

        let config_path = self.config_path(cluster_name);
        tokio::fs::write(&config_path, self.render_config(ports))
            .await
            .map_err(OrchestratorError::internal)?;

        let kubeconfig_path = self.kubeconfig_path(cluster_name);

        let create_result = Command::new("kind")
            .args([
                "create",
                "cluster",
                "--name",
                cluster_name,
                "--config",
                &config_path,
                "--kubeconfig",
                &kubeconfig_path,
            ])
            .env("KIND_EXPERIMENTAL_DOCKER_NETWORK", &self.network_name)
            .output()
            .await
            .map_err(OrchestratorError::internal)?;

        if !create_result.status.success() {
            let stderr = String::from_utf8_lossy(&create_result.stderr).to_string();
            let _ = self.delete(cluster_name).await;
            return Err(OrchestratorError::provisioning(ProvisioningStage::Cluster, stderr));
        }

        if let Err(err) = self.poll_readiness(&kubeconfig_path).await {
            let _ = self.delete(cluster_name).await;
            return Err(err);
        }

        let raw = tokio::fs::read_to_string(&kubeconfig_path)
            .await
            .map_err(OrchestratorError::internal)?;
        let rewritten = Self::rewrite_kubeconfig_server(&raw);
        tokio::fs::write(&kubeconfig_path, &rewritten)
            .await
            .map_err(OrchestratorError::internal)?;

        info!(cluster_name, elapsed_ms = start.elapsed().as_millis() as u64, "cluster ready");
        Ok(ClusterHandle {
            kubeconfig_path,
            duration: start.elapsed(),
        })
    }

    async fn delete(&self, cluster_name: &str) -> Result<(), OrchestratorError> {
        let output = Command::new("kind")
            .args(["delete", "cluster", "--name", cluster_name])
            .output()
            .await
            .map_err(OrchestratorError::internal)?;
        if !output.status.success() {
            warn!(cluster_name, "kind delete cluster reported failure, treating as best-effort");
        }
        let cluster_dir = format!("{}/{cluster_name}", self.work_dir);
        let _ = tokio::fs::remove_dir_all(&cluster_dir).await;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, OrchestratorError> {
        let output = Command::new("kind")
            .arg("get")
            .arg("clusters")
            .output()
            .await
            .map_err(OrchestratorError::internal)?;
        if !output.status.success() {
            return Err(OrchestratorError::new(
                ErrorKind::Internal,
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_owned)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_loopback_server_url() {
        let raw = "server: https://0.0.0.0:31337\n";
        assert_eq!(
            CliClusterDriver::rewrite_kubeconfig_server(raw),
            "server: https://127.0.0.1:31337\n"
        );
    }

    #[test]
    fn renders_expected_port_mappings() {
        let driver = CliClusterDriver::new("/tmp".into(), Duration::from_secs(2), "ckadlab".into());
        let rendered = driver.render_config(SessionPorts {
            api_port: 31000,
            http_port: 41000,
            https_port: 46000,
        });
        assert!(rendered.contains("apiServerPort: 31000"));
        assert!(rendered.contains("hostPort: 41000"));
        assert!(rendered.contains("hostPort: 46000"));
    }
}
