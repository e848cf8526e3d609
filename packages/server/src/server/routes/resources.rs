use axum::{
    extract::{rejection::JsonRejection, Extension},
    Json,
};
use chassis::ChassisError;
use tracing::warn;

use crate::domains::resources::{CreateResource, CreateResourceCommand, Resource};
use crate::server::app::AppState;
use crate::server::context::RequestContext;
use crate::server::error::ApiResult;
use crate::server::response::Reply;

/// `POST /v1/resources`
///
/// Responds 201 with the created resource once the owner's cached
/// dashboards are gone. A retry with the same key and body replays that
/// response; the same key with another body is a 409.
pub async fn create_resource(
    Extension(state): Extension<AppState>,
    ctx: RequestContext,
    payload: Result<Json<CreateResource>, JsonRejection>,
) -> ApiResult<Reply<Resource>> {
    let Json(input) = payload.map_err(|e| ctx.error(e))?;
    let command = CreateResourceCommand {
        owner_id: &ctx.actor.subject_id,
        input: &input,
    };

    let (resources, dashboards) = (&state.deps.resources, &state.deps.dashboards);
    let (actor, trace_id) = (&ctx.actor, ctx.request_id.as_str());
    let owned = input.clone();
    let result = state
        .deps
        .idempotency
        .run(
            ctx.idempotency_key(),
            &command,
            201,
            &state.shutdown.child_token(),
            || async move {
                let created = resources.create(actor, owned, trace_id).await?;
                // Committed: drop the owner's cached dashboards before the key
                // completes. `resource.created` repeats this for other instances.
                if let Err(e) = dashboards.invalidate(&created.owner_id).await {
                    warn!(owner_id = %created.owner_id, error = %e, "dashboard invalidation failed");
                }
                Ok::<_, ChassisError>(created)
            },
        )
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Reply::from(result))
}
