use chrono::{DateTime, Utc};
use ckadlab_core::{Session, SessionStatus};
use serde::Serialize;
use uuid::Uuid;

/// `{session_id, cluster_name, status, start_instant, ttl_minutes,
/// remaining_minutes, extended, stream_endpoint_ref}` (§6).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    pub session_id: Uuid,
    pub cluster_name: String,
    pub status: SessionStatus,
    pub start_instant: DateTime<Utc>,
    pub ttl_minutes: i64,
    pub remaining_minutes: i64,
    pub extended: bool,
    pub stream_endpoint_ref: String,
}

impl SessionDescriptor {
    pub fn from_session(session: &Session) -> Self {
        let now = Utc::now();
        Self {
            session_id: session.id,
            cluster_name: session.cluster_name.clone(),
            status: session.status,
            start_instant: session.start_instant,
            ttl_minutes: session.ttl_minutes,
            remaining_minutes: session.remaining_minutes(now),
            extended: session.extended,
            stream_endpoint_ref: format!("/terminal?session_id={}", session.id),
        }
    }
}

/// `{max_concurrent, active, available_slots, default_ttl_minutes,
/// extension_minutes}` (§6).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    pub max_concurrent: i64,
    pub active: i64,
    pub available_slots: i64,
    pub default_ttl_minutes: i64,
    pub extension_minutes: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_session_points_stream_endpoint_at_the_session_id() {
        let session = Session::reserved(Uuid::new_v4(), "ckad-abc123".to_string(), 60);
        let descriptor = SessionDescriptor::from_session(&session);

        assert_eq!(descriptor.session_id, session.id);
        assert_eq!(descriptor.cluster_name, "ckad-abc123");
        assert_eq!(descriptor.stream_endpoint_ref, format!("/terminal?session_id={}", session.id));
        assert!(!descriptor.extended);
    }

    #[test]
    fn from_session_reports_remaining_minutes_close_to_full_ttl() {
        let session = Session::reserved(Uuid::new_v4(), "ckad-def456".to_string(), 60);
        let descriptor = SessionDescriptor::from_session(&session);

        // Just reserved, so remaining should be essentially the full TTL.
        assert!(descriptor.remaining_minutes >= 59);
        assert!(descriptor.remaining_minutes <= 60);
    }

    #[test]
    fn session_descriptor_serializes_camel_case_fields() {
        let session = Session::reserved(Uuid::new_v4(), "ckad-ghi789".to_string(), 60);
        let json = serde_json::to_value(SessionDescriptor::from_session(&session)).unwrap();

        assert!(json.get("sessionId").is_some());
        assert!(json.get("clusterName").is_some());
        assert!(json.get("remainingMinutes").is_some());
        assert!(json.get("streamEndpointRef").is_some());
    }
}
