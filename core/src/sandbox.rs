use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use crate::error::OrchestratorError;

/// Opaque handle to a running sandbox container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SandboxHandle(pub String);

impl std::fmt::Display for SandboxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resource caps enforced on sandbox creation (§4.3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceCaps {
    pub memory_mib: u64,
    pub cpu: f64,
    pub pid_max: u32,
}

/// A PTY: a bidirectional byte stream with a resize control channel and an
/// exit-code future. `reader`/`writer` carry raw terminal bytes; sending on
/// `resize_tx` adjusts PTY geometry; `exit_code` resolves once, when the
/// sandboxed shell process exits.
pub struct PtyStream {
    pub reader: Box<dyn AsyncRead + Unpin + Send>,
    pub writer: Box<dyn AsyncWrite + Unpin + Send>,
    pub resize_tx: mpsc::Sender<(u16, u16)>,
    pub exit_code: oneshot::Receiver<i32>,
}

/// Owns the lifecycle of per-session Linux sandboxes: creation with resource
/// caps and network attachment, removal, and PTY access.
#[async_trait]
pub trait SandboxDriver: Send + Sync {
    /// Attach the sandbox to `cluster_name`'s container network, bind-mount
    /// `kubeconfig_path` read-only, and start a long-lived idle process that
    /// keeps it alive until `remove` is called.
    async fn create(
        &self,
        cluster_name: &str,
        kubeconfig_path: &str,
        caps: ResourceCaps,
    ) -> Result<SandboxHandle, OrchestratorError>;

    /// Idempotent: graceful stop with a 10s timeout, then force-remove.
    async fn remove(&self, handle: &SandboxHandle) -> Result<(), OrchestratorError>;

    /// Open a PTY with the given initial geometry. The sandboxed process'
    /// environment must include `TERM` and the initial `cols`/`rows`.
    async fn open_pty(
        &self,
        handle: &SandboxHandle,
        cols: u16,
        rows: u16,
    ) -> Result<PtyStream, OrchestratorError>;

    /// Ground-truth enumeration used by the Reaper's sweep loop.
    async fn list(&self) -> Result<Vec<SandboxHandle>, OrchestratorError>;
}
