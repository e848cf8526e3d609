//! Creator dashboard endpoints.

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Extension, Query},
    Json,
};
use chassis::aggregate::DashboardQuery;
use chassis::audit::AuditRecord;
use chassis::ChassisError;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domains::dashboard::{
    DashboardLayout, DashboardView, SaveLayout, SaveLayoutCommand, LAYOUT_SAVED,
};
use crate::server::app::AppState;
use crate::server::context::RequestContext;
use crate::server::error::ApiResult;
use crate::server::response::Reply;

#[derive(Debug, Default, Deserialize)]
pub struct DashboardParams {
    #[serde(alias = "date_range")]
    pub range: Option<String>,
    pub device: Option<String>,
    #[serde(alias = "timezone")]
    pub tz: Option<String>,
}

/// `GET /v1/dashboard?range=&device=&tz=`
pub async fn get_dashboard(
    Extension(state): Extension<AppState>,
    ctx: RequestContext,
    params: Result<Query<DashboardParams>, QueryRejection>,
) -> ApiResult<Reply<DashboardView>> {
    let Query(params) = params.map_err(|e| ctx.error(e))?;
    let query = DashboardQuery::normalize(
        &ctx.actor,
        params.range.as_deref(),
        params.device.as_deref(),
        params.tz.as_deref(),
    );

    let view = state
        .deps
        .dashboards
        .view(&query, &ctx.request_id, &state.shutdown.child_token())
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Reply::ok(view))
}

/// `PUT /v1/dashboard/layout`
pub async fn put_layout(
    Extension(state): Extension<AppState>,
    ctx: RequestContext,
    payload: Result<Json<SaveLayout>, JsonRejection>,
) -> ApiResult<Reply<DashboardLayout>> {
    let Json(input) = payload.map_err(|e| ctx.error(e))?;
    let command = SaveLayoutCommand {
        subject_id: &ctx.actor.subject_id,
        input: &input,
    };

    let dashboards = &state.deps.dashboards;
    let (actor, trace_id) = (&ctx.actor, ctx.request_id.as_str());
    let owned = input.clone();
    let result = state
        .deps
        .idempotency
        .run(
            ctx.idempotency_key(),
            &command,
            200,
            &state.shutdown.child_token(),
            || async move { dashboards.save_layout(actor, owned, trace_id).await },
        )
        .await
        .map_err(|e| ctx.error(e))?;

    if !result.replayed {
        state.deps.audit.append(
            AuditRecord::new(
                ctx.actor.subject_id.clone(),
                LAYOUT_SAVED,
                json!({
                    "widgets": result.output.widgets,
                    "version": result.output.version,
                    "request_id": ctx.request_id,
                }),
                state.deps.clock.now(),
            )
            .with_ip_address(ctx.ip_address()),
        );
    }
    Ok(Reply::from(result))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invalidated {
    pub subject_id: String,
    pub removed: usize,
}

/// `POST /v1/dashboard/invalidate` drops the caller's cached dashboards.
pub async fn invalidate_dashboard(
    Extension(state): Extension<AppState>,
    ctx: RequestContext,
) -> ApiResult<Reply<Invalidated>> {
    let dashboards = &state.deps.dashboards;
    let subject_id = ctx.actor.subject_id.clone();
    let result = state
        .deps
        .idempotency
        .run(
            ctx.idempotency_key(),
            &json!({"action": "dashboard.invalidate", "subject_id": subject_id}),
            200,
            &state.shutdown.child_token(),
            || async move {
                let removed = dashboards.invalidate(&subject_id).await?;
                Ok::<_, ChassisError>(Invalidated {
                    subject_id,
                    removed,
                })
            },
        )
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Reply::from(result).with_message("dashboard cache invalidated"))
}
