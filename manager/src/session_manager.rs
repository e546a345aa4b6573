use std::sync::Arc;

use ckadlab_common::rate_limit::RateLimiter;
use ckadlab_core::{
    ClusterDriver, ErrorKind, Identity, OrchestratorArgs, OrchestratorError, PortKind, SandboxDriver,
    Session, SessionPorts, SessionStatus, TaskCatalog, short_id,
};
use ckadlab_store::{PortAllocator, SessionStore};
use tracing::{error, info};
use uuid::Uuid;

use crate::compensation::Compensation;

/// Orchestrates the full lifecycle of a session: `start`, `status`,
/// `extend`, `stop` (§4.4). Each mutating operation is an explicit linear
/// pipeline of steps, each paired with a compensator pushed onto a stack on
/// success; any step's failure unwinds the stack instead of leaving partial
/// state (§9 compensation-stack redesign note).
pub struct SessionManager {
    pub(crate) store: Arc<SessionStore>,
    pub(crate) ports: Arc<PortAllocator>,
    pub(crate) cluster_driver: Arc<dyn ClusterDriver>,
    pub(crate) sandbox_driver: Arc<dyn SandboxDriver>,
    pub(crate) tasks: Arc<dyn TaskCatalog>,
    pub(crate) identity: Arc<dyn Identity>,
    pub(crate) config: Arc<OrchestratorArgs>,
    /// Guards §4.4's per-owner start-rate pre-check. `None` in tests that
    /// don't have a Redis backend; always `Some` in production wiring.
    pub(crate) start_rate_limiter: Option<Arc<RateLimiter>>,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<SessionStore>,
        ports: Arc<PortAllocator>,
        cluster_driver: Arc<dyn ClusterDriver>,
        sandbox_driver: Arc<dyn SandboxDriver>,
        tasks: Arc<dyn TaskCatalog>,
        identity: Arc<dyn Identity>,
        config: Arc<OrchestratorArgs>,
        start_rate_limiter: Option<Arc<RateLimiter>>,
    ) -> Self {
        Self {
            store,
            ports,
            cluster_driver,
            sandbox_driver,
            tasks,
            identity,
            config,
            start_rate_limiter,
        }
    }

    pub async fn authenticate(&self, token: &str) -> Result<Uuid, OrchestratorError> {
        self.identity
            .verify(token)
            .await
            .map(|v| v.owner_id)
            .map_err(|err| match err {
                ckadlab_core::IdentityError::Expired => {
                    OrchestratorError::new(ErrorKind::CredentialExpired, "bearer token expired")
                }
                ckadlab_core::IdentityError::Invalid => {
                    OrchestratorError::new(ErrorKind::CredentialInvalid, "bearer token invalid")
                }
            })
    }

    /// §4.4 `start`. Pre-checks: owner must have no active session
    /// (`ConflictActive`), and the platform must be under `max_concurrent`
    /// (`AtCapacity`). Then: reserve → lease ports → create cluster → create
    /// sandbox → assign tasks → advance to `Running`.
    pub async fn start(&self, owner_id: Uuid) -> Result<Session, OrchestratorError> {
        if let Some(limiter) = &self.start_rate_limiter {
            if !limiter.check(&format!("start:{owner_id}")).await {
                return Err(OrchestratorError::rate_limited());
            }
        }
        if self.store.get_active_for_owner(owner_id).await.map_err(internal)?.is_some() {
            return Err(OrchestratorError::conflict_active());
        }
        if self.store.count_active().await.map_err(internal)? >= self.config.max_concurrent {
            return Err(OrchestratorError::at_capacity());
        }

        let cluster_name = format!("ckad-{}", short_id());
        let mut session = Session::reserved(owner_id, cluster_name.clone(), self.config.ttl_minutes);
        self.store.insert(&session).await.map_err(internal)?;

        let mut stack: Vec<Compensation> = Vec::new();
        let result = self.provision(&mut session, &mut stack).await;

        match result {
            Ok(()) => {
                session.advance(SessionStatus::Running)?;
                self.store.update(&session).await.map_err(internal)?;
                info!(session_id = %session.id, owner_id = %owner_id, "session started");
                Ok(session)
            }
            Err(err) => {
                self.unwind(stack).await;
                session.append_note(format!("start failed: {}", err.kind()));
                let _ = session.advance(SessionStatus::Failed);
                let _ = self.store.update(&session).await;
                error!(session_id = %session.id, %err, "session start failed, compensated");
                Err(err)
            }
        }
    }

    async fn provision(
        &self,
        session: &mut Session,
        stack: &mut Vec<Compensation>,
    ) -> Result<(), OrchestratorError> {
        session.advance(SessionStatus::Provisioning)?;
        self.store.update(session).await.map_err(internal)?;

        let (api_start, api_end) = self.config.port_range(PortKind::Api);
        let (http_start, http_end) = self.config.port_range(PortKind::IngressHttp);
        let (https_start, https_end) = self.config.port_range(PortKind::IngressHttps);

        let api_port = self.ports.lease(session.id, PortKind::Api, api_start, api_end).await?;
        stack.push(Compensation::ReleasePorts(session.id));
        let http_port = self
            .ports
            .lease(session.id, PortKind::IngressHttp, http_start, http_end)
            .await?;
        let https_port = self
            .ports
            .lease(session.id, PortKind::IngressHttps, https_start, https_end)
            .await?;

        let ports = SessionPorts {
            api_port,
            http_port,
            https_port,
        };

        let cluster_handle = self.cluster_driver.create(&session.cluster_name, ports).await?;
        stack.push(Compensation::DeleteCluster(session.cluster_name.clone()));
        session.kubeconfig_location = Some(cluster_handle.kubeconfig_path.clone());

        let caps = ckadlab_core::ResourceCaps {
            memory_mib: self.config.sandbox_memory_mib,
            cpu: self.config.sandbox_cpu,
            pid_max: self.config.sandbox_pid_max,
        };
        let sandbox_handle = self
            .sandbox_driver
            .create(&session.cluster_name, &cluster_handle.kubeconfig_path, caps)
            .await?;
        stack.push(Compensation::RemoveSandbox(sandbox_handle.clone()));
        session.sandbox_handle = Some(sandbox_handle.0.clone());

        match self.tasks.assign_random(session.id, self.config.default_task_count).await {
            Ok(assigned) => info!(session_id = %session.id, count = assigned.len(), "tasks assigned"),
            Err(err) => error!(session_id = %session.id, %err, "task assignment failed, continuing without assigned tasks"),
        }

        Ok(())
    }

    /// §4.4 `status`. Owner-scoped; `NotFound` if absent, `Forbidden` if
    /// owned by someone else.
    pub async fn status(&self, session_id: Uuid, owner_id: Uuid) -> Result<Session, OrchestratorError> {
        self.load_owned(session_id, owner_id).await
    }

    /// §6 `status` (owner-scoped, no session id): the owner's one active
    /// session, or `None` if they have none.
    pub async fn active_session_for_owner(&self, owner_id: Uuid) -> Result<Option<Session>, OrchestratorError> {
        self.store.get_active_for_owner(owner_id).await.map_err(internal)
    }

    /// §4.4 `extend`. Only legal once per session (`AlreadyExtended`), and
    /// only while the session is non-terminal.
    pub async fn extend(&self, session_id: Uuid, owner_id: Uuid) -> Result<Session, OrchestratorError> {
        let mut session = self.load_owned(session_id, owner_id).await?;
        if session.status.is_terminal() {
            return Err(OrchestratorError::not_found("session is no longer active"));
        }
        if session.extended {
            return Err(OrchestratorError::new(
                ErrorKind::AlreadyExtended,
                "session has already been extended once",
            ));
        }
        session.ttl_minutes += self.config.extension_minutes;
        session.extended = true;
        self.store.update(&session).await.map_err(internal)?;
        Ok(session)
    }

    /// §4.4 `stop`. User-initiated; tears down sandbox and cluster and
    /// releases ports the same way the Reaper's expire loop does, but
    /// advances to `Ending` then `Ended` rather than `TimedOut`.
    pub async fn stop(&self, session_id: Uuid, owner_id: Uuid) -> Result<(), OrchestratorError> {
        let mut session = self.load_owned(session_id, owner_id).await?;
        if session.status.is_terminal() {
            return Ok(());
        }
        session.advance(SessionStatus::Ending)?;
        self.store.update(&session).await.map_err(internal)?;
        self.teardown(&mut session).await;
        session.advance(SessionStatus::Ended)?;
        self.store.update(&session).await.map_err(internal)?;
        Ok(())
    }

    /// §6 `platform_status`: the global capacity picture `max_concurrent`,
    /// currently-active count, remaining slots, and the configured time
    /// budget. Read-only, no ownership check.
    pub async fn active_count(&self) -> Result<i64, OrchestratorError> {
        self.store.count_active().await.map_err(internal)
    }

    pub fn max_concurrent(&self) -> i64 {
        self.config.max_concurrent
    }

    pub fn default_ttl_minutes(&self) -> i64 {
        self.config.ttl_minutes
    }

    pub fn extension_minutes(&self) -> i64 {
        self.config.extension_minutes
    }

    /// Best-effort teardown shared by `stop` and the Reaper: always attempt
    /// every cleanup step even if an earlier one fails (§4.7).
    pub(crate) async fn teardown(&self, session: &mut Session) {
        if let Some(handle) = session.sandbox_handle.take() {
            if let Err(err) = self.sandbox_driver.remove(&ckadlab_core::SandboxHandle(handle)).await {
                error!(session_id = %session.id, %err, "teardown: sandbox removal failed");
            }
        }
        if let Err(err) = self.cluster_driver.delete(&session.cluster_name).await {
            error!(session_id = %session.id, %err, "teardown: cluster deletion failed");
        }
        if let Err(err) = self.ports.release(session.id).await {
            error!(session_id = %session.id, %err, "teardown: port release failed");
        }
    }

    async fn load_owned(&self, session_id: Uuid, owner_id: Uuid) -> Result<Session, OrchestratorError> {
        let session = self
            .store
            .get(session_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| OrchestratorError::not_found("no such session"))?;
        if session.owner_id != owner_id {
            return Err(OrchestratorError::new(ErrorKind::Forbidden, "session belongs to another owner"));
        }
        Ok(session)
    }
}

fn internal(err: impl std::fmt::Display) -> OrchestratorError {
    OrchestratorError::new(ErrorKind::Internal, err.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ckadlab_core::{JwtIdentity, OrchestratorArgs};
    use ckadlab_drivers::{FakeClusterDriver, FakeSandboxDriver};
    use ckadlab_store::{PgTaskCatalog, PortAllocator, SessionStore, init_schema};
    use clap::Parser;
    use deadpool_postgres::{Config, Runtime};
    use tokio_postgres::NoTls;

    use super::*;

    /// Requires a reachable Postgres at `DATABASE_URL`; the Session Store
    /// itself is integration-level (§OQ-3 in DESIGN.md) so orchestration
    /// logic is exercised end-to-end against it with fake drivers standing
    /// in for `kind`/`docker`.
    async fn test_manager() -> SessionManager {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for this test");
        let mut cfg = Config::new();
        cfg.url = Some(database_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls).unwrap();
        init_schema(&pool).await.unwrap();

        let config = Arc::new(OrchestratorArgs::parse_from(["ckadlab", "--max-concurrent", "2"]));
        SessionManager::new(
            Arc::new(SessionStore::new(pool.clone())),
            Arc::new(PortAllocator::new(pool.clone())),
            Arc::new(FakeClusterDriver::new()),
            Arc::new(FakeSandboxDriver::new()),
            Arc::new(PgTaskCatalog::new(pool)),
            Arc::new(JwtIdentity::from_hmac_secret(b"test-secret")),
            config,
            None,
        )
    }

    #[tokio::test]
    #[ignore = "requires a live Postgres at DATABASE_URL"]
    async fn start_then_stop_round_trips() {
        let manager = test_manager().await;
        let owner_id = Uuid::new_v4();

        let session = manager.start(owner_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Running);

        manager.stop(session.id, owner_id).await.unwrap();
        let reloaded = manager.status(session.id, owner_id).await.unwrap();
        assert_eq!(reloaded.status, SessionStatus::Ended);
    }

    #[tokio::test]
    #[ignore = "requires a live Postgres at DATABASE_URL"]
    async fn second_concurrent_start_is_rejected() {
        let manager = test_manager().await;
        let owner_id = Uuid::new_v4();
        manager.start(owner_id).await.unwrap();

        let err = manager.start(owner_id).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ConflictActive));
    }

    #[tokio::test]
    #[ignore = "requires a live Postgres at DATABASE_URL"]
    async fn failed_provisioning_unwinds_and_marks_failed() {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for this test");
        let mut cfg = Config::new();
        cfg.url = Some(database_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls).unwrap();
        init_schema(&pool).await.unwrap();

        let failing_sandbox = Arc::new(FakeSandboxDriver::new());
        *failing_sandbox.fail_create.lock() = true;

        let config = Arc::new(OrchestratorArgs::parse_from(["ckadlab"]));
        let manager = SessionManager::new(
            Arc::new(SessionStore::new(pool.clone())),
            Arc::new(PortAllocator::new(pool.clone())),
            Arc::new(FakeClusterDriver::new()),
            failing_sandbox,
            Arc::new(PgTaskCatalog::new(pool)),
            Arc::new(JwtIdentity::from_hmac_secret(b"test-secret")),
            config,
            None,
        );

        let owner_id = Uuid::new_v4();
        let err = manager.start(owner_id).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Provisioning { .. }));

        // Session row is persisted as Failed, not left dangling as Provisioning.
        assert!(manager.store.get_active_for_owner(owner_id).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "requires a live Postgres at DATABASE_URL"]
    async fn extend_is_rejected_the_second_time() {
        let manager = test_manager().await;
        let owner_id = Uuid::new_v4();
        let session = manager.start(owner_id).await.unwrap();

        let extended = manager.extend(session.id, owner_id).await.unwrap();
        assert!(extended.extended);
        assert_eq!(extended.ttl_minutes, manager.config.ttl_minutes + manager.config.extension_minutes);

        // Confirm the new deadline was actually persisted, not just held in
        // the in-memory struct `extend` returned.
        let reloaded = manager.status(session.id, owner_id).await.unwrap();
        assert!(reloaded.extended);
        assert_eq!(reloaded.ttl_minutes, manager.config.ttl_minutes + manager.config.extension_minutes);

        let err = manager.extend(session.id, owner_id).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::AlreadyExtended));
    }
}
