use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OrchestratorError;

/// A fixed catalog entry; grading against it is out of scope (§B.3) — the
/// orchestrator only assigns and records pass/fail, it does not evaluate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub session_id: Uuid,
    pub task_id: Uuid,
    pub outcome: TaskOutcome,
    pub recorded_instant: DateTime<Utc>,
}

/// Read-through access to the task catalog and per-session results. Deliberately
/// thin: a `tasks` table seeded at schema-init and a `task_results` table
/// recording what a session attempted.
#[async_trait]
pub trait TaskCatalog: Send + Sync {
    /// Assign up to `count` distinct tasks at random to a session, returning
    /// the assigned set. Fewer than `count` may be returned if the catalog is
    /// smaller than `count`.
    async fn assign_random(&self, session_id: Uuid, count: i64) -> Result<Vec<Task>, OrchestratorError>;

    async fn record_result(
        &self,
        session_id: Uuid,
        task_id: Uuid,
        outcome: TaskOutcome,
    ) -> Result<(), OrchestratorError>;

    async fn results_for(&self, session_id: Uuid) -> Result<Vec<TaskResult>, OrchestratorError>;
}
