use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, OrchestratorError};

/// Session status. Transitions are monotonic; see [`SessionStatus::can_advance_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Reserved,
    Provisioning,
    Running,
    Ending,
    Ended,
    TimedOut,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::TimedOut | Self::Failed)
    }

    pub fn is_non_terminal(self) -> bool {
        !self.is_terminal()
    }

    /// Whether advancing from `self` to `next` is a legal, forward-only
    /// transition per the state diagram in §4.5. `Failed` and `Ending` are
    /// reachable from any non-terminal state (failure/stop can interrupt any
    /// step); terminal states never advance further.
    pub fn can_advance_to(self, next: Self) -> bool {
        use SessionStatus::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Reserved, Provisioning) => true,
            (Provisioning, Running) => true,
            (Running, Ending) => true,
            (Ending, Ended) => true,
            (Ending, TimedOut) => true,
            (_, Failed) => true,
            (_, Ending) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Reserved => "Reserved",
            Self::Provisioning => "Provisioning",
            Self::Running => "Running",
            Self::Ending => "Ending",
            Self::Ended => "Ended",
            Self::TimedOut => "TimedOut",
            Self::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

/// Durable record for a leased practice environment. Mirrors the `sessions`
/// table one-for-one; the Session Store is the only writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub status: SessionStatus,
    pub start_instant: DateTime<Utc>,
    pub ttl_minutes: i64,
    pub extended: bool,
    pub cluster_name: String,
    pub kubeconfig_location: Option<String>,
    pub sandbox_handle: Option<String>,
    /// Append-only free-text log; the first compensation error's kind is
    /// recorded here on failure (§4.4).
    pub notes: String,
}

impl Session {
    pub fn reserved(owner_id: Uuid, cluster_name: String, ttl_minutes: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            status: SessionStatus::Reserved,
            start_instant: Utc::now(),
            ttl_minutes,
            extended: false,
            cluster_name,
            kubeconfig_location: None,
            sandbox_handle: None,
            notes: String::new(),
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.start_instant + chrono::Duration::minutes(self.ttl_minutes)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status.is_non_terminal() && self.expires_at() < now
    }

    pub fn remaining_minutes(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at() - now).num_minutes().max(0)
    }

    /// Attempt to advance `status`, enforcing the monotonic state machine.
    /// Returns `Internal` (a programmer error, not a user-facing one) if the
    /// transition is illegal — callers should treat this as unreachable in
    /// correct code.
    pub fn advance(&mut self, next: SessionStatus) -> Result<(), OrchestratorError> {
        if !self.status.can_advance_to(next) {
            return Err(OrchestratorError::new(
                ErrorKind::Internal,
                format!("illegal transition {} -> {}", self.status, next),
            ));
        }
        self.status = next;
        Ok(())
    }

    pub fn append_note(&mut self, note: impl AsRef<str>) {
        if !self.notes.is_empty() {
            self.notes.push_str("; ");
        }
        self.notes.push_str(note.as_ref());
    }
}

/// A short, url-safe identifier suffix for `ckad-<shortid>` cluster names.
pub fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..10].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_legal() {
        use SessionStatus::*;
        assert!(Reserved.can_advance_to(Provisioning));
        assert!(Provisioning.can_advance_to(Running));
        assert!(Running.can_advance_to(Ending));
        assert!(Ending.can_advance_to(Ended));
        assert!(Ending.can_advance_to(TimedOut));
    }

    #[test]
    fn failure_reachable_from_any_non_terminal_state() {
        use SessionStatus::*;
        for s in [Reserved, Provisioning, Running, Ending] {
            assert!(s.can_advance_to(Failed));
        }
    }

    #[test]
    fn terminal_states_never_advance() {
        use SessionStatus::*;
        for s in [Ended, TimedOut, Failed] {
            for t in [Reserved, Provisioning, Running, Ending, Ended, TimedOut, Failed] {
                assert!(!s.can_advance_to(t), "{s} -> {t} should be illegal");
            }
        }
    }

    #[test]
    fn no_backward_transitions() {
        use SessionStatus::*;
        assert!(!Running.can_advance_to(Reserved));
        assert!(!Provisioning.can_advance_to(Reserved));
        assert!(!Ending.can_advance_to(Running));
    }

    #[test]
    fn advance_mutates_on_success_and_rejects_illegal() {
        let mut session = Session::reserved(Uuid::new_v4(), "ckad-abc123".into(), 60);
        assert!(session.advance(SessionStatus::Provisioning).is_ok());
        assert_eq!(session.status, SessionStatus::Provisioning);
        assert!(session.advance(SessionStatus::Reserved).is_err());
        assert_eq!(session.status, SessionStatus::Provisioning);
    }

    #[test]
    fn expiry_math() {
        let mut session = Session::reserved(Uuid::new_v4(), "ckad-abc123".into(), 60);
        session.start_instant = Utc::now() - chrono::Duration::minutes(61);
        assert!(session.is_expired(Utc::now()));
    }
}
