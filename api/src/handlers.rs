use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use ckadlab_core::{ErrorKind, OrchestratorError};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{PlatformStatus, SessionDescriptor};
use crate::server::AppState;

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| OrchestratorError::new(ErrorKind::Unauthenticated, "missing bearer token").into())
}

/// First hop of `X-Forwarded-For`, or a constant key when the header is
/// absent (local/dev traffic all shares one bucket rather than skipping
/// the limit entirely, unlike the general-request layer's IP-only gate).
fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<uuid::Uuid, ApiError> {
    let key = format!("auth:{}", client_key(headers));
    if !state.auth_limiter.check(&key).await {
        return Err(OrchestratorError::rate_limited().into());
    }
    Ok(state.manager.authenticate(bearer_token(headers)?).await?)
}

pub async fn healthz() -> impl IntoResponse {
    "OK"
}

pub async fn start(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, ApiError> {
    let owner_id = authenticate(&state, &headers).await?;
    let session = state.manager.start(owner_id).await?;
    Ok(Json(SessionDescriptor::from_session(&session)))
}

pub async fn status(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, ApiError> {
    let owner_id = authenticate(&state, &headers).await?;
    match state.manager.active_session_for_owner(owner_id).await? {
        Some(session) => Ok(Json(SessionDescriptor::from_session(&session)).into_response()),
        None => Ok(Json(serde_json::json!({ "status": "no active session" })).into_response()),
    }
}

pub async fn extend(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let owner_id = authenticate(&state, &headers).await?;
    let session = state.manager.extend(session_id, owner_id).await?;
    Ok(Json(SessionDescriptor::from_session(&session)))
}

pub async fn stop(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let owner_id = authenticate(&state, &headers).await?;
    state.manager.stop(session_id, owner_id).await?;
    Ok(Json(serde_json::json!({ "acknowledged": true })))
}

pub async fn platform_status(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let active = state.manager.active_count().await?;
    let max_concurrent = state.manager.max_concurrent();
    Ok(Json(PlatformStatus {
        max_concurrent,
        active,
        available_slots: (max_concurrent - active).max(0),
        default_ttl_minutes: state.manager.default_ttl_minutes(),
        extension_minutes: state.manager.extension_minutes(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn bearer_token_strips_the_prefix() {
        assert_eq!(bearer_token(&headers_with("Bearer abc.def.ghi")).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn bearer_token_rejects_missing_header() {
        let err = bearer_token(&HeaderMap::new()).unwrap_err();
        assert_eq!(*err.0.kind(), ErrorKind::Unauthenticated);
    }

    #[test]
    fn bearer_token_rejects_wrong_scheme() {
        let err = bearer_token(&headers_with("Basic abc")).unwrap_err();
        assert_eq!(*err.0.kind(), ErrorKind::Unauthenticated);
    }

    #[test]
    fn client_key_takes_the_first_hop_of_xff() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.10, 70.41.3.18".parse().unwrap());
        assert_eq!(client_key(&headers), "203.0.113.10");
    }

    #[test]
    fn client_key_falls_back_when_header_absent() {
        assert_eq!(client_key(&HeaderMap::new()), "unknown");
    }
}
