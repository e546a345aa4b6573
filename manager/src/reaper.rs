use std::sync::Arc;
use std::time::Duration;

use ckadlab_core::SessionStatus;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::SessionManager;

/// Background reclamation: an expire loop that times out sessions past
/// their TTL, and a sweep loop that reconciles driver-reported clusters and
/// sandboxes against the store, releasing anything orphaned (§4.7).
pub struct Reaper {
    manager: Arc<SessionManager>,
    expire_tick: Duration,
    sweep_tick: Duration,
}

impl Reaper {
    pub fn new(manager: Arc<SessionManager>, expire_tick: Duration, sweep_tick: Duration) -> Self {
        Self {
            manager,
            expire_tick,
            sweep_tick,
        }
    }

    /// Spawns both loops; they run until `cancel` fires, mirroring
    /// `compiler/src/process.rs`'s `tokio::select! { cancel.cancelled() => break, ... }`
    /// shape.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        let expire_handle = {
            let reaper = Arc::clone(&self);
            let cancel = cancel.clone();
            tokio::spawn(async move { reaper.run_expire_loop(cancel).await })
        };
        let sweep_handle = {
            let reaper = Arc::clone(&self);
            tokio::spawn(async move { reaper.run_sweep_loop(cancel).await })
        };
        (expire_handle, sweep_handle)
    }

    async fn run_expire_loop(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.expire_tick);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("expire loop shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.expire_once().await;
                }
            }
        }
    }

    async fn run_sweep_loop(&self, cancel: CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
        }
        self.sweep_once().await;

        let mut interval = tokio::time::interval(self.sweep_tick);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("sweep loop shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.sweep_once().await;
                }
            }
        }
    }

    async fn expire_once(&self) {
        let expired = match self.manager.store.list_expired(chrono::Utc::now()).await {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(%err, "expire loop: failed to list expired sessions");
                return;
            }
        };
        for mut session in expired {
            if session.advance(SessionStatus::Ending).is_err() {
                continue;
            }
            if self.manager.store.update(&session).await.is_err() {
                continue;
            }
            self.manager.teardown(&mut session).await;
            if session.advance(SessionStatus::TimedOut).is_ok() {
                let _ = self.manager.store.update(&session).await;
                info!(session_id = %session.id, "session timed out and reaped");
            }
        }
    }

    async fn sweep_once(&self) {
        match self.manager.ports.sweep_orphans().await {
            Ok(freed) if !freed.is_empty() => info!(count = freed.len(), "sweep loop: released orphaned port leases"),
            Ok(_) => {}
            Err(err) => warn!(%err, "sweep loop: port orphan sweep failed"),
        }

        let live_clusters = match self.manager.cluster_driver.list().await {
            Ok(c) => c,
            Err(err) => {
                warn!(%err, "sweep loop: failed to list clusters");
                return;
            }
        };
        let live_sandboxes = match self.manager.sandbox_driver.list().await {
            Ok(s) => s,
            Err(err) => {
                warn!(%err, "sweep loop: failed to list sandboxes");
                return;
            }
        };
        let active_sessions = match self.manager.store.list_all().await {
            Ok(s) => s,
            Err(err) => {
                warn!(%err, "sweep loop: failed to list sessions");
                return;
            }
        };
        let known_cluster_names: std::collections::HashSet<_> =
            active_sessions.iter().map(|s| s.cluster_name.clone()).collect();
        let known_sandbox_handles: std::collections::HashSet<_> =
            active_sessions.iter().filter_map(|s| s.sandbox_handle.clone()).collect();

        // Only clusters this orchestrator could have created are candidates
        // for deletion; unrelated `kind` clusters on the host must not be
        // touched.
        for cluster_name in live_clusters.into_iter().filter(|name| name.starts_with("ckad-")) {
            if !known_cluster_names.contains(&cluster_name) {
                warn!(cluster_name, "sweep loop: deleting orphaned cluster with no owning session");
                let _ = self.manager.cluster_driver.delete(&cluster_name).await;
            }
        }

        for handle in live_sandboxes {
            if !known_sandbox_handles.contains(&handle.0) {
                warn!(sandbox = %handle.0, "sweep loop: removing orphaned sandbox with no owning session");
                let _ = self.manager.sandbox_driver.remove(&handle).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ckadlab_core::{JwtIdentity, OrchestratorArgs};
    use ckadlab_drivers::{FakeClusterDriver, FakeSandboxDriver};
    use ckadlab_store::{PgTaskCatalog, PortAllocator, SessionStore, init_schema};
    use clap::Parser;
    use deadpool_postgres::{Config, Runtime};
    use tokio_postgres::NoTls;
    use uuid::Uuid;

    use super::*;

    /// Requires a reachable Postgres at `DATABASE_URL`, same as the
    /// `session_manager` tests.
    #[tokio::test]
    #[ignore = "requires a live Postgres at DATABASE_URL"]
    async fn expired_session_is_timed_out_and_torn_down() {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for this test");
        let mut cfg = Config::new();
        cfg.url = Some(database_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls).unwrap();
        init_schema(&pool).await.unwrap();

        let config = Arc::new(OrchestratorArgs::parse_from(["ckadlab", "--ttl-minutes", "0"]));
        let manager = Arc::new(SessionManager::new(
            Arc::new(SessionStore::new(pool.clone())),
            Arc::new(PortAllocator::new(pool.clone())),
            Arc::new(FakeClusterDriver::new()),
            Arc::new(FakeSandboxDriver::new()),
            Arc::new(PgTaskCatalog::new(pool)),
            Arc::new(JwtIdentity::from_hmac_secret(b"test-secret")),
            config,
            None,
        ));

        let owner_id = Uuid::new_v4();
        let session = manager.start(owner_id).await.unwrap();

        let reaper = Reaper::new(Arc::clone(&manager), Duration::from_secs(1), Duration::from_secs(3600));
        reaper.expire_once().await;

        let reloaded = manager.status(session.id, owner_id).await.unwrap();
        assert_eq!(reloaded.status, SessionStatus::TimedOut);
    }
}
