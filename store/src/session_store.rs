use chrono::{DateTime, Utc};
use ckadlab_core::{Session, SessionStatus};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use uuid::Uuid;

/// Postgres-backed persistence for sessions (§3 `Session`, §6 persisted
/// state layout). Every write is a full-row upsert/update rather than the
/// teacher's dynamic partial-`SET` builder in `meta/src/db.rs` — `Session`
/// has few enough mutable fields that a partial builder would only add
/// indirection without saving a meaningful number of round trips.
pub struct SessionStore {
    pool: Pool,
}

impl SessionStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, session: &Session) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO sessions
                    (id, owner_id, status, start_instant, ttl_minutes, extended,
                     cluster_name, kubeconfig_location, sandbox_handle, notes)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                &[
                    &session.id,
                    &session.owner_id,
                    &session.status.to_string(),
                    &session.start_instant,
                    &session.ttl_minutes,
                    &session.extended,
                    &session.cluster_name,
                    &session.kubeconfig_location,
                    &session.sandbox_handle,
                    &session.notes,
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn update(&self, session: &Session) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE sessions SET
                    status = $2, extended = $3, kubeconfig_location = $4,
                    sandbox_handle = $5, notes = $6, ttl_minutes = $7
                 WHERE id = $1",
                &[
                    &session.id,
                    &session.status.to_string(),
                    &session.extended,
                    &session.kubeconfig_location,
                    &session.sandbox_handle,
                    &session.notes,
                    &session.ttl_minutes,
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> anyhow::Result<Option<Session>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM sessions WHERE id = $1", &[&id])
            .await?;
        Ok(row.map(row_to_session))
    }

    /// At most one non-terminal session exists per owner (§9 uniqueness
    /// redesign note, enforced redundantly by the partial unique index in
    /// the schema).
    pub async fn get_active_for_owner(&self, owner_id: Uuid) -> anyhow::Result<Option<Session>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT * FROM sessions
                 WHERE owner_id = $1 AND status NOT IN ('Ended', 'TimedOut', 'Failed')",
                &[&owner_id],
            )
            .await?;
        Ok(row.map(row_to_session))
    }

    pub async fn count_active(&self) -> anyhow::Result<i64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM sessions
                 WHERE status NOT IN ('Ended', 'TimedOut', 'Failed')",
                &[],
            )
            .await?;
        Ok(row.get(0))
    }

    /// Sessions whose clock has run out but which have not yet been reaped;
    /// feeds the Reaper's expire loop (§4.7).
    pub async fn list_expired(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Session>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT * FROM sessions
                 WHERE status NOT IN ('Ended', 'TimedOut', 'Failed')
                   AND start_instant + (ttl_minutes || ' minutes')::interval < $1",
                &[&now],
            )
            .await?;
        Ok(rows.into_iter().map(row_to_session).collect())
    }

    pub async fn list_all(&self) -> anyhow::Result<Vec<Session>> {
        let client = self.pool.get().await?;
        let rows = client.query("SELECT * FROM sessions", &[]).await?;
        Ok(rows.into_iter().map(row_to_session).collect())
    }
}

fn row_to_session(row: Row) -> Session {
    let status_str: String = row.get("status");
    Session {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        status: parse_status(&status_str),
        start_instant: row.get("start_instant"),
        ttl_minutes: row.get("ttl_minutes"),
        extended: row.get("extended"),
        cluster_name: row.get("cluster_name"),
        kubeconfig_location: row.get("kubeconfig_location"),
        sandbox_handle: row.get("sandbox_handle"),
        notes: row.get("notes"),
    }
}

fn parse_status(s: &str) -> SessionStatus {
    match s {
        "Reserved" => SessionStatus::Reserved,
        "Provisioning" => SessionStatus::Provisioning,
        "Running" => SessionStatus::Running,
        "Ending" => SessionStatus::Ending,
        "Ended" => SessionStatus::Ended,
        "TimedOut" => SessionStatus::TimedOut,
        "Failed" => SessionStatus::Failed,
        other => panic!("unknown session status persisted: {other}"),
    }
}
