//! HTTP error mapping.
//!
//! Every failure leaves the server as
//! `{"status": "error", "error": {"code", "message", "request_id"?, "details"?}}`.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chassis::ChassisError;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

/// Wire code for a mutating request without an `Idempotency-Key`.
pub const MISSING_IDEMPOTENCY_KEY: &str = "missing_idempotency_key";

#[derive(Debug)]
pub struct ApiError {
    error: ChassisError,
    request_id: Option<String>,
    details: Option<Value>,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(error: ChassisError) -> Self {
        Self {
            error,
            request_id: None,
            details: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn code(&self) -> &'static str {
        match &self.error {
            ChassisError::IdempotencyRequired => MISSING_IDEMPOTENCY_KEY,
            other => other.code(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match &self.error {
            ChassisError::Unauthorized => StatusCode::UNAUTHORIZED,
            ChassisError::Forbidden(_) => StatusCode::FORBIDDEN,
            ChassisError::NotFound(_) => StatusCode::NOT_FOUND,
            ChassisError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ChassisError::Conflict(_) => StatusCode::CONFLICT,
            ChassisError::IdempotencyRequired => StatusCode::BAD_REQUEST,
            ChassisError::IdempotencyConflict { .. } => StatusCode::CONFLICT,
            ChassisError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ChassisError::InvalidEnvelope(_) | ChassisError::UnsupportedEventType(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ChassisError::Cancelled | ChassisError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ChassisError> for ApiError {
    fn from(error: ChassisError) -> Self {
        Self::new(error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(ChassisError::InvalidInput(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(ChassisError::InvalidInput(rejection.body_text()))
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    status: &'static str,
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(
                code = self.code(),
                request_id = ?self.request_id,
                error = %self.error,
                "request failed"
            );
        }

        let body = ErrorBody {
            status: "error",
            error: ErrorDetail {
                code: self.code(),
                message: self.error.safe_message(),
                request_id: self.request_id.as_deref(),
                details: self.details.as_ref(),
            },
        };
        let mut response = (status, Json(body)).into_response();

        if let ChassisError::RateLimited {
            retry_after: Some(retry_after),
        } = &self.error
        {
            let secs = retry_after.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
