//! JSON error responses for the admin API.
//!
//! Every failure is rendered as `{ "code": ..., "message": ... }`, plus a
//! `fields` array for validation errors.

use axum::{
    body::Bytes,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use reportline_scheduler::{FieldError, SchedulerError};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::error;

pub struct ApiError(pub SchedulerError);

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            SchedulerError::Validation { .. } | SchedulerError::InvalidAnchor { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            SchedulerError::DefinitionNotFound { .. } | SchedulerError::TemplateNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            SchedulerError::AlreadyRunning { .. } | SchedulerError::RunInProgress { .. } => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(code = self.0.code(), "request failed: {}", self.0);
        }
        let mut body = json!({
            "code": self.0.code(),
            "message": self.0.to_string(),
        });
        if let SchedulerError::Validation { ref fields } = self.0 {
            body["fields"] = json!(fields);
        }
        (status, Json(body)).into_response()
    }
}

/// Decode a JSON request body, reporting malformed input as a validation
/// error on `body` rather than axum's plain-text rejection.
pub fn parse_body<T: DeserializeOwned>(bytes: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(bytes).map_err(|e| {
        ApiError(SchedulerError::Validation {
            fields: vec![FieldError::invalid("body", e.to_string())],
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        let cases = [
            (
                SchedulerError::Validation { fields: vec![] },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                SchedulerError::DefinitionNotFound { id: "x".into() },
                StatusCode::NOT_FOUND,
            ),
            (
                SchedulerError::AlreadyRunning { id: "x".into() },
                StatusCode::CONFLICT,
            ),
            (
                SchedulerError::RunInProgress { id: "x".into() },
                StatusCode::CONFLICT,
            ),
            (
                SchedulerError::Internal("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }

    #[test]
    fn malformed_body_is_a_validation_error() {
        let err = parse_body::<serde_json::Value>(&Bytes::from_static(b"{not json")).unwrap_err();
        assert_eq!(err.0.code(), "VALIDATION_ERROR");
    }
}
