//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Conflict(msg)
            | ApiError::Unavailable(msg)
            | ApiError::Internal(msg) => msg,
        };

        if status.is_server_error() {
            tracing::error!(status = %status, error = %message, "Request failed");
        }

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<appforge_core::Error> for ApiError {
    fn from(err: appforge_core::Error) -> Self {
        use appforge_core::Error;
        match err {
            Error::NotFound(_)
            | Error::ActionNotFound(_)
            | Error::StepNotFound(_)
            | Error::BuildArtifactNotFound(_) => ApiError::NotFound(err.to_string()),
            Error::StepNotComplete(_) | Error::InvalidStepTransition { .. } => {
                ApiError::Conflict(err.to_string())
            }
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<appforge_db::DbError> for ApiError {
    fn from(err: appforge_db::DbError) -> Self {
        appforge_core::Error::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appforge_core::{BuildId, Error, StepId, StepStatus};

    #[test]
    fn test_core_error_status_mapping() {
        let cases = [
            (Error::NotFound("build".into()), StatusCode::NOT_FOUND),
            (Error::StepNotFound("GENERATE_APPLICATION".into()), StatusCode::NOT_FOUND),
            (Error::BuildArtifactNotFound(BuildId::new()), StatusCode::NOT_FOUND),
            (Error::StepNotComplete("GENERATE_APPLICATION".into()), StatusCode::CONFLICT),
            (
                Error::InvalidStepTransition {
                    step: StepId::new(),
                    from: StepStatus::Succeeded,
                    to: StepStatus::Failed,
                },
                StatusCode::CONFLICT,
            ),
            (Error::InvalidInput("commit id".into()), StatusCode::BAD_REQUEST),
            (Error::Transport("timeout".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn test_db_not_found_maps_to_404() {
        let err = ApiError::from(appforge_db::DbError::NotFound("build x".into()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
