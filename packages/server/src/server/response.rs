//! Success envelope: `{"status": "success", "message"?, "data"?}`.

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chassis::idempotency::Idempotent;
use serde::Serialize;

/// Set on responses served from the idempotency store.
pub static IDEMPOTENT_REPLAYED: HeaderName = HeaderName::from_static("idempotent-replayed");

#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success",
            message: None,
            data: Some(data),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// An envelope with its status code, optionally marked as a replay.
pub struct Reply<T> {
    status: StatusCode,
    body: ApiResponse<T>,
    replayed: bool,
}

impl<T: Serialize> Reply<T> {
    pub fn ok(data: T) -> Self {
        Self::with_status(StatusCode::OK, data)
    }

    pub fn with_status(status: StatusCode, data: T) -> Self {
        Self {
            status,
            body: ApiResponse::success(data),
            replayed: false,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.body = self.body.with_message(message);
        self
    }
}

impl<T: Serialize> From<Idempotent<T>> for Reply<T> {
    fn from(result: Idempotent<T>) -> Self {
        Self {
            status: StatusCode::from_u16(result.status).unwrap_or(StatusCode::OK),
            body: ApiResponse::success(result.output),
            replayed: result.replayed,
        }
    }
}

impl<T: Serialize> IntoResponse for Reply<T> {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        if self.replayed {
            response
                .headers_mut()
                .insert(IDEMPOTENT_REPLAYED.clone(), HeaderValue::from_static("true"));
        }
        response
    }
}
