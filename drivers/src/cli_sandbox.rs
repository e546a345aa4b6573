use std::io::{Read, Write};
use std::sync::Arc;

use ckadlab_core::{ErrorKind, OrchestratorError, PtyStream, ResourceCaps, SandboxDriver, SandboxHandle};
use parking_lot::Mutex;
use portable_pty::{CommandBuilder, PtySize, native_pty_system};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

const SANDBOX_IMAGE: &str = "ckadlab/sandbox:latest";

/// Shells out to `docker` to run sandboxes, and to `portable-pty` to attach
/// an interactive shell to a running sandbox. The PTY's reader/writer run on
/// blocking OS threads (`portable-pty` is a synchronous API) bridged to the
/// async world over `tokio::io::duplex`.
pub struct CliSandboxDriver {
    network_name: String,
}

impl CliSandboxDriver {
    pub fn new(network_name: String) -> Self {
        Self { network_name }
    }
}

#[async_trait::async_trait]
impl SandboxDriver for CliSandboxDriver {
    async fn create(
        &self,
        cluster_name: &str,
        kubeconfig_path: &str,
        caps: ResourceCaps,
    ) -> Result<SandboxHandle, OrchestratorError> {
        let container_name = format!("{cluster_name}-sandbox");
        let output = Command::new("docker")
            .args([
                "run",
                "-d",
                "--rm",
                "--name",
                &container_name,
                "--network",
                &self.network_name,
                "--memory",
                &format!("{}m", caps.memory_mib),
                "--cpus",
                &caps.cpu.to_string(),
                "--pids-limit",
                &caps.pid_max.to_string(),
                "--read-only",
                "--tmpfs",
                "/tmp:size=100m,noexec",
                "--user",
                "1000:1000",
                "-v",
                &format!("{kubeconfig_path}:/home/practice/.kube/config:ro"),
                SANDBOX_IMAGE,
                "sleep",
                "infinity",
            ])
            .output()
            .await
            .map_err(internal)?;

        if !output.status.success() {
            return Err(internal(String::from_utf8_lossy(&output.stderr)));
        }
        Ok(SandboxHandle(container_name))
    }

    async fn remove(&self, handle: &SandboxHandle) -> Result<(), OrchestratorError> {
        let stop = Command::new("docker")
            .args(["stop", "-t", "10", &handle.0])
            .output()
            .await
            .map_err(internal)?;
        if stop.status.success() {
            return Ok(());
        }
        warn!(sandbox = %handle.0, "graceful stop failed, force-killing");
        let _ = Command::new("docker").args(["kill", &handle.0]).output().await;
        Ok(())
    }

    async fn open_pty(
        &self,
        handle: &SandboxHandle,
        cols: u16,
        rows: u16,
    ) -> Result<PtyStream, OrchestratorError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(internal)?;

        let mut cmd = CommandBuilder::new("docker");
        cmd.args(["exec", "-it", "-e", "TERM=xterm-256color", &handle.0, "/bin/sh"]);
        let mut child = pair.slave.spawn_command(cmd).map_err(internal)?;
        drop(pair.slave);

        let mut pty_reader = pair.master.try_clone_reader().map_err(internal)?;
        let mut pty_writer = pair.master.take_writer().map_err(internal)?;
        let master = Arc::new(Mutex::new(pair.master));

        let (app_reader, mut pty_to_app) = tokio::io::duplex(8192);
        let (mut app_to_pty, app_writer) = tokio::io::duplex(8192);

        let rt = tokio::runtime::Handle::current();
        std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match pty_reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if rt.block_on(pty_to_app.write_all(&buf[..n])).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let rt2 = tokio::runtime::Handle::current();
        std::thread::spawn(move || {
            let _guard = rt2.enter();
            let mut buf = [0u8; 4096];
            loop {
                let n = match rt2.block_on(tokio::io::AsyncReadExt::read(&mut app_to_pty, &mut buf)) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                if pty_writer.write_all(&buf[..n]).is_err() {
                    break;
                }
            }
        });

        let (resize_tx, mut resize_rx) = mpsc::channel::<(u16, u16)>(8);
        let resize_master = Arc::clone(&master);
        tokio::spawn(async move {
            while let Some((cols, rows)) = resize_rx.recv().await {
                let _ = resize_master.lock().resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                });
            }
        });

        let (exit_tx, exit_rx) = oneshot::channel::<i32>();
        std::thread::spawn(move || {
            let status = child.wait();
            let code = status.map(|s| s.exit_code() as i32).unwrap_or(-1);
            let _ = exit_tx.send(code);
        });

        Ok(PtyStream {
            reader: Box::new(app_reader),
            writer: Box::new(app_writer),
            resize_tx,
            exit_code: exit_rx,
        })
    }

    async fn list(&self) -> Result<Vec<SandboxHandle>, OrchestratorError> {
        let output = Command::new("docker")
            .args(["ps", "--filter", "name=-sandbox", "--format", "{{.Names}}"])
            .output()
            .await
            .map_err(internal)?;
        if !output.status.success() {
            return Err(internal(String::from_utf8_lossy(&output.stderr)));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|s| SandboxHandle(s.to_owned()))
            .collect())
    }
}

fn internal(err: impl std::fmt::Display) -> OrchestratorError {
    OrchestratorError::new(ErrorKind::Internal, err.to_string())
}
