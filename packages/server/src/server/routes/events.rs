//! Event ingress for other services.

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    Json,
};
use chassis::{ChassisError, Role};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::server::app::AppState;
use crate::server::context::RequestContext;
use crate::server::error::ApiResult;
use crate::server::response::Reply;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Accepted {
    pub event_id: Option<String>,
}

/// `POST /v1/events`
///
/// Queues the raw message on the inbound transport and answers 202. Envelope
/// checks happen in the inbound pipeline, so a malformed event is accepted
/// here and lands in the DLQ.
pub async fn ingest_event(
    Extension(state): Extension<AppState>,
    ctx: RequestContext,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Reply<Accepted>> {
    if !matches!(ctx.actor.role, Role::System | Role::Admin | Role::Sre) {
        return Err(ctx.error(ChassisError::Forbidden(format!(
            "role {} may not publish events",
            ctx.actor.role
        ))));
    }
    let Json(raw) = payload.map_err(|e| ctx.error(e))?;

    let ingress = state.deps.transport.publisher();
    let owned = raw.clone();
    let result = state
        .deps
        .idempotency
        .run(
            ctx.idempotency_key(),
            &raw,
            StatusCode::ACCEPTED.as_u16(),
            &state.shutdown.child_token(),
            || async move {
                let event_id = owned
                    .get("event_id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                ingress.send_raw(owned).map_err(ChassisError::Internal)?;
                debug!(event_id = ?event_id, "event queued for inbound processing");
                Ok::<_, ChassisError>(Accepted { event_id })
            },
        )
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Reply::from(result))
}
