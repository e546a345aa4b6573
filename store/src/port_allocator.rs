use chrono::Utc;
use ckadlab_core::{ErrorKind, OrchestratorError, PortKind};
use deadpool_postgres::Pool;
use uuid::Uuid;

/// Transactional "smallest free integer in range" port allocator (§4.1).
/// Concurrent leases of the same kind are serialized with a Postgres
/// advisory transaction lock keyed on the kind name, rather than a
/// `SELECT ... FOR UPDATE` (which cannot lock rows that don't exist yet for
/// currently-free ports) — the same "claim a lock, do the read-then-write,
/// release on commit" shape `compiler/src/dispatch.rs` uses for exactly-once
/// message dispatch.
pub struct PortAllocator {
    pool: Pool,
}

impl PortAllocator {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn lease(
        &self,
        session_id: Uuid,
        kind: PortKind,
        range_start: u16,
        range_end: u16,
    ) -> Result<i32, OrchestratorError> {
        let mut client = self.pool.get().await.map_err(internal)?;
        let txn = client.transaction().await.map_err(internal)?;

        txn.execute("SELECT pg_advisory_xact_lock(hashtext($1))", &[&kind.to_string()])
            .await
            .map_err(internal)?;

        let rows = txn
            .query(
                "SELECT port FROM port_leases WHERE port BETWEEN $1 AND $2 ORDER BY port",
                &[&(range_start as i32), &(range_end as i32)],
            )
            .await
            .map_err(internal)?;

        let taken: Vec<i32> = rows.iter().map(|r| r.get(0)).collect();
        let mut candidate = range_start as i32;
        for port in &taken {
            if *port == candidate {
                candidate += 1;
            } else if *port > candidate {
                break;
            }
        }
        if candidate > range_end as i32 {
            return Err(OrchestratorError::exhausted(kind));
        }

        txn.execute(
            "INSERT INTO port_leases (port, session_id, kind, allocated_instant)
             VALUES ($1, $2, $3, $4)",
            &[&candidate, &session_id, &kind.to_string(), &Utc::now()],
        )
        .await
        .map_err(internal)?;

        txn.commit().await.map_err(internal)?;
        Ok(candidate)
    }

    pub async fn release(&self, session_id: Uuid) -> Result<(), OrchestratorError> {
        let client = self.pool.get().await.map_err(internal)?;
        client
            .execute("DELETE FROM port_leases WHERE session_id = $1", &[&session_id])
            .await
            .map_err(internal)?;
        Ok(())
    }

    /// Releases any lease whose owning session is not currently active;
    /// returns the freed ports for logging. Feeds the Reaper's sweep loop.
    pub async fn sweep_orphans(&self) -> Result<Vec<i32>, OrchestratorError> {
        let client = self.pool.get().await.map_err(internal)?;
        let rows = client
            .query(
                "DELETE FROM port_leases
                 WHERE session_id NOT IN (
                     SELECT id FROM sessions WHERE status NOT IN ('Ended', 'TimedOut', 'Failed')
                 )
                 RETURNING port",
                &[],
            )
            .await
            .map_err(internal)?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }
}

fn internal(err: impl std::fmt::Display) -> OrchestratorError {
    OrchestratorError::new(ErrorKind::Internal, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smallest_free_scan_skips_contiguous_taken_prefix() {
        let taken = vec![30000, 30001, 30003];
        let range_start = 30000i32;
        let range_end = 30009i32;
        let mut candidate = range_start;
        for port in &taken {
            if *port == candidate {
                candidate += 1;
            } else if *port > candidate {
                break;
            }
        }
        assert_eq!(candidate, 30002);
        assert!(candidate <= range_end);
    }
}
