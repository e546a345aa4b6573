use ckadlab_core::{ClusterDriver, SandboxDriver, SandboxHandle};
use tracing::warn;
use uuid::Uuid;

use crate::SessionManager;

/// One compensator, paired with the step that succeeded and pushed it.
/// `start`/`extend` build a stack of these as each step completes; on
/// failure the stack unwinds in reverse, attempting every cleanup and
/// logging rather than aborting on the first cleanup failure (§4.4, §9
/// compensation-stack redesign note).
pub enum Compensation {
    ReleasePorts(Uuid),
    DeleteCluster(String),
    RemoveSandbox(SandboxHandle),
}

impl SessionManager {
    /// Unwinds `stack` in reverse, attempting every cleanup even if an
    /// earlier one in the same pass fails (log-and-continue, mirroring
    /// `compiler/src/process.rs`'s "always attempt cleanup" handling).
    pub(crate) async fn unwind(&self, mut stack: Vec<Compensation>) {
        while let Some(step) = stack.pop() {
            match step {
                Compensation::ReleasePorts(session_id) => {
                    if let Err(err) = self.ports.release(session_id).await {
                        warn!(%session_id, %err, "compensation: failed to release ports");
                    }
                }
                Compensation::DeleteCluster(cluster_name) => {
                    if let Err(err) = self.cluster_driver.delete(&cluster_name).await {
                        warn!(%cluster_name, %err, "compensation: failed to delete cluster");
                    }
                }
                Compensation::RemoveSandbox(handle) => {
                    if let Err(err) = self.sandbox_driver.remove(&handle).await {
                        warn!(sandbox = %handle, %err, "compensation: failed to remove sandbox");
                    }
                }
            }
        }
    }
}
