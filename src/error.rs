//! Error taxonomy for the HTTP surface.
//!
//! Every handler failure is one of these variants; the response body is
//! always `{"message": ...}`. Internal failures are logged server-side and
//! their detail suppressed in release builds.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or malformed input. 400.
    #[error("{0}")]
    Validation(String),

    /// Missing, invalid, or expired credential. 401.
    #[error("{0}")]
    Unauthenticated(String),

    /// Authenticated but insufficiently privileged. 403.
    #[error("{0}")]
    Forbidden(String),

    /// Resource absent, or deliberately hidden from the caller. 404.
    #[error("{0}")]
    NotFound(String),

    /// Duplicate membership or email. Surfaced as 400 like the rest of the
    /// validation family; the variant stays distinct in the taxonomy.
    #[error("{0}")]
    Conflict(String),

    /// Task assignee is neither the project owner nor a member. 400.
    #[error("Assignee must be a member of the project")]
    InvalidAssignee,

    /// Store or other unexpected failure. 500.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Conflict(_) | ApiError::InvalidAssignee => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Internal(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Internal(e) => {
                error!(err = %format!("{e:#}"), "internal error");
                if cfg!(debug_assertions) {
                    e.to_string()
                } else {
                    "Internal server error".to_string()
                }
            }
            other => other.to_string(),
        };
        (self.status(), Json(json!({ "message": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert_eq!(
            ApiError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Conflict("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::InvalidAssignee.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Unauthenticated("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Forbidden("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Internal(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn invalid_assignee_message_is_stable() {
        assert_eq!(
            ApiError::InvalidAssignee.to_string(),
            "Assignee must be a member of the project"
        );
    }
}
