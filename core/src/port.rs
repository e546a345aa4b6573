use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use crate::error::PortKind;

/// A reserved host TCP port of a declared kind, owned by exactly one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortLease {
    pub port: i32,
    pub session_id: Uuid,
    pub kind: PortKind,
    pub allocated_instant: DateTime<Utc>,
}

/// The three ports leased to a single session, one per kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionPorts {
    pub api_port: i32,
    pub http_port: i32,
    pub https_port: i32,
}
