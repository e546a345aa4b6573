use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ckadlab_core::{ErrorKind, OrchestratorError};
use serde::Serialize;

/// Wraps `OrchestratorError` so its `(kind, message)` pair can be rendered
/// as the stable HTTP error body (§7): never a stack trace, never a path.
pub struct ApiError(pub OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self(err)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    #[serde(flatten)]
    kind: &'a ErrorKind,
    message: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_class()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(kind = %self.0.kind(), message = %self.0.message, "request failed");
        }
        let body = ErrorBody {
            kind: self.0.kind(),
            message: &self.0.message,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn rate_limited_renders_429_with_kind_and_message() {
        let response = ApiError(OrchestratorError::rate_limited()).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["kind"], "rateLimited");
        assert_eq!(json["message"], "rate limit exceeded");
    }

    #[tokio::test]
    async fn conflict_active_renders_409() {
        let response = ApiError(OrchestratorError::conflict_active()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn unmapped_status_code_falls_back_to_internal_server_error() {
        // status_class() only ever returns codes StatusCode recognizes, but
        // the fallback path still needs a response rather than a panic.
        let err = OrchestratorError::new(ErrorKind::Internal, "boom");
        let response = ApiError(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
