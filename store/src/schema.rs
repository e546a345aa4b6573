use deadpool_postgres::Pool;

/// Creates the persisted-state tables if absent and adds any columns a
/// prior version of this schema lacked. Mirrors the teacher's
/// `CREATE TABLE IF NOT EXISTS` + `ALTER TABLE ... ADD COLUMN IF NOT EXISTS`
/// inline-migration idiom rather than a separate migration runner.
pub async fn init_schema(pool: &Pool) -> anyhow::Result<()> {
    let client = pool.get().await?;

    client
        .batch_execute(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id                   UUID PRIMARY KEY,
                owner_id             UUID NOT NULL,
                status               TEXT NOT NULL,
                start_instant        TIMESTAMPTZ NOT NULL,
                ttl_minutes          BIGINT NOT NULL,
                extended             BOOLEAN NOT NULL DEFAULT FALSE,
                cluster_name         TEXT NOT NULL UNIQUE,
                kubeconfig_location  TEXT,
                sandbox_handle       TEXT,
                notes                TEXT NOT NULL DEFAULT ''
            );

            CREATE UNIQUE INDEX IF NOT EXISTS sessions_owner_active_uq
                ON sessions (owner_id)
                WHERE status NOT IN ('Ended', 'TimedOut', 'Failed');

            CREATE TABLE IF NOT EXISTS port_leases (
                port               INTEGER PRIMARY KEY,
                session_id         UUID NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                kind               TEXT NOT NULL,
                allocated_instant  TIMESTAMPTZ NOT NULL
            );

            CREATE INDEX IF NOT EXISTS port_leases_session_id_idx ON port_leases (session_id);

            CREATE TABLE IF NOT EXISTS tasks (
                id      UUID PRIMARY KEY,
                title   TEXT NOT NULL,
                prompt  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS task_results (
                session_id        UUID NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                task_id           UUID NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                outcome           TEXT NOT NULL,
                recorded_instant  TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (session_id, task_id)
            );

            CREATE TABLE IF NOT EXISTS assigned_tasks (
                session_id  UUID NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                task_id     UUID NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                PRIMARY KEY (session_id, task_id)
            );
            "#,
        )
        .await?;

    seed_tasks_if_empty(pool).await?;
    Ok(())
}

const SEED_TASKS: &[(&str, &str)] = &[
    ("Create a Namespace", "Create a namespace named `practice`."),
    (
        "Expose a Deployment",
        "Create a Deployment `web` with 2 replicas running `nginx`, then expose it as a ClusterIP Service on port 80.",
    ),
    (
        "ConfigMap and volume mount",
        "Create a ConfigMap `app-config` and mount it as a volume at `/etc/app` in a new Pod.",
    ),
    (
        "Rolling update",
        "Update the `web` Deployment's image and observe a rolling update complete without downtime.",
    ),
    (
        "Resource limits",
        "Create a Pod with a container that requests 100m CPU / 128Mi memory and limits 250m CPU / 256Mi memory.",
    ),
];

async fn seed_tasks_if_empty(pool: &Pool) -> anyhow::Result<()> {
    let client = pool.get().await?;
    let row = client.query_one("SELECT COUNT(*) FROM tasks", &[]).await?;
    let count: i64 = row.get(0);
    if count > 0 {
        return Ok(());
    }
    for (title, prompt) in SEED_TASKS {
        client
            .execute(
                "INSERT INTO tasks (id, title, prompt) VALUES ($1, $2, $3)",
                &[&uuid::Uuid::new_v4(), title, prompt],
            )
            .await?;
    }
    Ok(())
}
