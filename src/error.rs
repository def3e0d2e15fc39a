//! Closed error-kind set shared across the engine, with the HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Every failure the engine can surface. Handlers map these onto status
/// codes; all bodies carry `{"detail": ...}` (Conflict adds `run_id`).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream rate limited: {0}")]
    RateLimited(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("parse failure: {0}")]
    Parse(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("analysis already running (run {run_id})")]
    Conflict { run_id: i64 },

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::RateLimited(_)
            | ApiError::UpstreamUnavailable(_)
            | ApiError::Timeout(_)
            | ApiError::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Parse(_)
            | ApiError::Invariant(_)
            | ApiError::Storage(_)
            | ApiError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for failures worth retrying at the request layer (C2 only; the
    /// orchestrator never retries at run level).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited(_) | ApiError::UpstreamUnavailable(_) | ApiError::Timeout(_)
        )
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        ApiError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Parse(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            ApiError::Conflict { run_id } => serde_json::json!({
                "detail": self.to_string(),
                "run_id": run_id,
            }),
            _ => serde_json::json!({ "detail": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_mapping_matches_contract() {
        assert_eq!(
            ApiError::NotFound("run 9".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict { run_id: 3 }.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Timeout("upstream".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::Parse("bad json".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Storage("disk".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn transient_kinds_are_retryable() {
        assert!(ApiError::RateLimited("429".into()).is_transient());
        assert!(ApiError::Timeout("t".into()).is_transient());
        assert!(!ApiError::NotFound("x".into()).is_transient());
        assert!(!ApiError::Parse("x".into()).is_transient());
    }
}
