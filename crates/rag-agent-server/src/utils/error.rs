use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::services::agent::AgentError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

/// Failure envelope: `{ "success": false, "error": { "code", "message" } }`
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: ErrorBody,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Agent(e) => match e {
                AgentError::InvalidKnowledgeBase(_) => StatusCode::NOT_FOUND,
                AgentError::RetrievalUnavailable(_) | AgentError::ModelUnavailable(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                AgentError::ToolExecutionFailed { .. } | AgentError::ReasoningExhausted { .. } => {
                    StatusCode::BAD_GATEWAY
                }
                AgentError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::Agent(e) => e.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "{}", self);
        } else {
            tracing::warn!(code = self.code(), "{}", self);
        }

        let body = Json(ErrorResponse {
            success: false,
            error: ErrorBody {
                code: self.code(),
                message: self.to_string(),
            },
        });

        (status, body).into_response()
    }
}
