use axum::extract::{rejection::QueryRejection, Extension, Query};
use chassis::audit::{AuditFilter, AuditRecord};
use serde::Deserialize;

use crate::server::app::AppState;
use crate::server::context::RequestContext;
use crate::server::error::ApiResult;
use crate::server::response::Reply;

#[derive(Debug, Default, Deserialize)]
pub struct AuditParams {
    pub actor_id: Option<String>,
    pub action_type: Option<String>,
    /// Defaults to 100, capped at 1000.
    pub limit: Option<usize>,
}

/// `GET /v1/audit` for admin, auditor, sre and system actors.
pub async fn query_audit(
    Extension(state): Extension<AppState>,
    ctx: RequestContext,
    params: Result<Query<AuditParams>, QueryRejection>,
) -> ApiResult<Reply<Vec<AuditRecord>>> {
    let Query(params) = params.map_err(|e| ctx.error(e))?;
    let filter = AuditFilter {
        actor_id: params.actor_id,
        action_type: params.action_type,
    };

    let records = state
        .deps
        .audit
        .query(&ctx.actor, &filter, params.limit.unwrap_or(0))
        .map_err(|e| ctx.error(e))?;
    Ok(Reply::ok(records))
}
