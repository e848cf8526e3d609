use std::time::Duration;

use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    service: String,
    outbox: OutboxHealth,
}

#[derive(Serialize)]
pub struct OutboxHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Health check endpoint
///
/// Checks that the outbox store answers within 5 seconds. Returns 200 OK when
/// healthy, 503 Service Unavailable otherwise.
pub async fn health_handler(
    Extension(state): Extension<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let outbox = match tokio::time::timeout(
        Duration::from_secs(5),
        state.deps.outbox.list_pending(1),
    )
    .await
    {
        Ok(Ok(_)) => OutboxHealth {
            status: "ok".to_string(),
            error: None,
        },
        Ok(Err(e)) => OutboxHealth {
            status: "error".to_string(),
            error: Some(format!("Outbox read failed: {}", e)),
        },
        Err(_) => OutboxHealth {
            status: "error".to_string(),
            error: Some("Outbox read timeout (>5s)".to_string()),
        },
    };

    let is_healthy = outbox.status == "ok";
    let status_code = if is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if is_healthy { "healthy" } else { "unhealthy" }.to_string(),
            service: state.deps.config.service_name.clone(),
            outbox,
        }),
    )
}
