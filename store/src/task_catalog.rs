use async_trait::async_trait;
use chrono::Utc;
use ckadlab_core::{ErrorKind, OrchestratorError, Task, TaskCatalog, TaskOutcome, TaskResult};
use deadpool_postgres::Pool;
use rand::seq::SliceRandom;
use uuid::Uuid;

pub struct PgTaskCatalog {
    pool: Pool,
}

impl PgTaskCatalog {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskCatalog for PgTaskCatalog {
    async fn assign_random(&self, session_id: Uuid, count: i64) -> Result<Vec<Task>, OrchestratorError> {
        let mut client = self.pool.get().await.map_err(internal)?;
        let rows = client
            .query("SELECT id, title, prompt FROM tasks", &[])
            .await
            .map_err(internal)?;
        let mut tasks: Vec<Task> = rows
            .iter()
            .map(|r| Task {
                id: r.get("id"),
                title: r.get("title"),
                prompt: r.get("prompt"),
            })
            .collect();
        tasks.shuffle(&mut rand::rng());
        tasks.truncate(count.max(0) as usize);

        let txn = client.transaction().await.map_err(internal)?;
        for task in &tasks {
            txn.execute(
                "INSERT INTO assigned_tasks (session_id, task_id) VALUES ($1, $2)
                 ON CONFLICT (session_id, task_id) DO NOTHING",
                &[&session_id, &task.id],
            )
            .await
            .map_err(internal)?;
        }
        txn.commit().await.map_err(internal)?;

        Ok(tasks)
    }

    async fn record_result(
        &self,
        session_id: Uuid,
        task_id: Uuid,
        outcome: TaskOutcome,
    ) -> Result<(), OrchestratorError> {
        let client = self.pool.get().await.map_err(internal)?;
        let outcome_str = match outcome {
            TaskOutcome::Passed => "passed",
            TaskOutcome::Failed => "failed",
        };
        client
            .execute(
                "INSERT INTO task_results (session_id, task_id, outcome, recorded_instant)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (session_id, task_id)
                 DO UPDATE SET outcome = EXCLUDED.outcome, recorded_instant = EXCLUDED.recorded_instant",
                &[&session_id, &task_id, &outcome_str, &Utc::now()],
            )
            .await
            .map_err(internal)?;
        Ok(())
    }

    async fn results_for(&self, session_id: Uuid) -> Result<Vec<TaskResult>, OrchestratorError> {
        let client = self.pool.get().await.map_err(internal)?;
        let rows = client
            .query(
                "SELECT session_id, task_id, outcome, recorded_instant FROM task_results WHERE session_id = $1",
                &[&session_id],
            )
            .await
            .map_err(internal)?;
        Ok(rows
            .iter()
            .map(|r| {
                let outcome_str: String = r.get("outcome");
                TaskResult {
                    session_id: r.get("session_id"),
                    task_id: r.get("task_id"),
                    outcome: if outcome_str == "passed" {
                        TaskOutcome::Passed
                    } else {
                        TaskOutcome::Failed
                    },
                    recorded_instant: r.get("recorded_instant"),
                }
            })
            .collect())
    }
}

fn internal(err: impl std::fmt::Display) -> OrchestratorError {
    OrchestratorError::new(ErrorKind::Internal, err.to_string())
}
