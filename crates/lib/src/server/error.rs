//! HTTP error responses: `{"detail": "..."}` with a matching status code.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::exec::ExecError;
use crate::llm::LlmError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// A collaborator failure, reported with the collaborator's own message.
    /// Arguments refused before anything ran are the caller's fault.
    pub fn collaborator(context: &str, err: LlmError) -> Self {
        if let LlmError::Exec(e @ (ExecError::NotAllowed(_) | ExecError::InvalidArgs(_))) = &err {
            log::debug!("{}: {}", context, e);
            return ApiError::BadRequest(format!("{}: {}", context, e));
        }
        let detail = match &err {
            LlmError::Exec(e) => e.detail(),
            other => other.to_string(),
        };
        log::warn!("{}: {}", context, detail);
        ApiError::Internal(format!("{}: {}", context, detail))
    }

    pub fn bad_request(err: ExecError) -> Self {
        ApiError::BadRequest(err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
