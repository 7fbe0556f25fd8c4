//! HTTP error responses
//!
//! Every failure leaving a handler is rendered as
//! `{"error": {"code": <status>, "message": .., "detail": ..}}`; upstream
//! failures also carry `upstream_status` and `upstream_body`.

use std::any::Any;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{LookupError, ValidationError};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_body: Option<String>,
}

/// Handler error, converted from the library error types.
#[derive(Debug)]
pub struct ApiError(LookupError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            LookupError::Validation(_) => StatusCode::BAD_REQUEST,
            LookupError::NonDiffusible { .. } => StatusCode::FORBIDDEN,
            LookupError::UpstreamAuth | LookupError::Token(_) => StatusCode::SERVICE_UNAVAILABLE,
            LookupError::Upstream { status: 404, .. } => StatusCode::NOT_FOUND,
            LookupError::Upstream { .. }
            | LookupError::Transport { .. }
            | LookupError::Decode { .. } => StatusCode::BAD_GATEWAY,
            LookupError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Text for the `detail` field. Token endpoint failures carry the raw
    /// token endpoint response, which stays in the logs.
    fn detail(&self) -> String {
        match &self.0 {
            LookupError::Token(_) => "token endpoint unavailable".to_string(),
            other => other.to_string(),
        }
    }

    fn message(&self) -> &'static str {
        match &self.0 {
            LookupError::Validation(_) => "Invalid request",
            LookupError::NonDiffusible { .. } => "Establishment is not publicly disclosed",
            LookupError::UpstreamAuth => "Registry authentication failed",
            LookupError::Token(_) => "Registry credentials unavailable",
            LookupError::Upstream { status: 404, .. } => "Establishment not found",
            LookupError::Upstream { .. } => "Registry error",
            LookupError::Transport { .. } => "Registry unreachable",
            LookupError::Decode { .. } => "Unexpected registry response",
            LookupError::Timeout(_) => "Request timed out",
        }
    }
}

impl From<LookupError> for ApiError {
    fn from(err: LookupError) -> Self {
        Self(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self(LookupError::Validation(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self.0, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self.0, "Request rejected");
        }

        let (upstream_status, upstream_body) = match &self.0 {
            LookupError::Upstream { status, body, .. } => (Some(*status), Some(body.clone())),
            _ => (None, None),
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: status.as_u16(),
                message: self.message().to_string(),
                detail: Some(self.detail()),
                upstream_status,
                upstream_body,
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Response for a handler that panicked. The panic payload is logged, never
/// returned.
pub fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else {
        "unknown panic payload"
    };
    tracing::error!(panic = %detail, "Handler panicked");

    let body = ErrorBody {
        error: ErrorDetail {
            code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            message: "Internal server error".to_string(),
            detail: None,
            upstream_status: None,
            upstream_body: None,
        },
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}
