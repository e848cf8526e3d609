use axum::{
    extract::{Extension, Request},
    http::{header::AUTHORIZATION, HeaderMap, HeaderName},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chassis::{Actor, ChassisError, Role};
use tracing::debug;

use super::reject;
use crate::server::app::AppState;

pub static ACTOR_ROLE_HEADER: HeaderName = HeaderName::from_static("x-actor-role");

/// Actor authentication middleware
///
/// The bearer token is the subject id; `X-Actor-Role` selects the role, with
/// the service default for absent or unknown values. Requests without a
/// subject are rejected with 401.
pub async fn require_actor(
    Extension(state): Extension<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    match extract_actor(request.headers(), state.deps.config.default_role) {
        Ok(actor) => {
            debug!(subject_id = %actor.subject_id, role = %actor.role, "actor resolved");
            request.extensions_mut().insert(actor);
            next.run(request).await
        }
        Err(e) => reject(&request, e).into_response(),
    }
}

/// Extract the actor from request headers
pub fn extract_actor(headers: &HeaderMap, default_role: Role) -> Result<Actor, ChassisError> {
    let auth_str = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ChassisError::Unauthorized)?;

    // Handle both "Bearer <subject>" and a raw subject
    let subject = auth_str.strip_prefix("Bearer ").unwrap_or(auth_str).trim();

    let role = Role::parse_or(
        headers.get(&ACTOR_ROLE_HEADER).and_then(|v| v.to_str().ok()),
        default_role,
    );
    Actor::new(subject, role)
}
