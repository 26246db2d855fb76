//! API error handling
//!
//! Maps the authentication error taxonomy onto JSON error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use gate_core::GateError;
use serde::Serialize;

#[derive(Debug)]
pub enum ApiError {
    Gate(GateError),
    BadRequest(String),
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Gate(err) => {
                StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        ApiError::Gate(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    retryable: bool,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            // Infrastructure details stay in the log
            ApiError::Gate(err @ GateError::Transport { .. }) => {
                tracing::error!(error = %err, "Authentication backend unavailable");
                ErrorBody {
                    error: err.error_code(),
                    message: "Service temporarily unavailable. Please try again.".to_string(),
                    retryable: true,
                }
            }
            ApiError::Gate(err @ GateError::Config(_)) => {
                tracing::error!(error = %err, "Configuration error while handling request");
                ErrorBody {
                    error: err.error_code(),
                    message: "Internal error".to_string(),
                    retryable: false,
                }
            }
            ApiError::Gate(GateError::PolicyViolation { message }) => ErrorBody {
                error: "policy_violation",
                message: message.clone(),
                retryable: false,
            },
            ApiError::Gate(err) => ErrorBody {
                error: err.error_code(),
                message: err.to_string(),
                retryable: err.is_retryable(),
            },
            ApiError::BadRequest(msg) => ErrorBody {
                error: "bad_request",
                message: msg.clone(),
                retryable: false,
            },
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error while handling request");
                ErrorBody {
                    error: "internal_error",
                    message: "Internal error".to_string(),
                    retryable: false,
                }
            }
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
