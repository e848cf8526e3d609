//! Application setup and server configuration.

use axum::{
    extract::Extension,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method,
    },
    middleware,
    routing::{get, post, put},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::kernel::ServerDeps;
use crate::server::middleware::{
    assign_request_id, extract_client_ip, require_actor, require_idempotency_key,
    ACTOR_ROLE_HEADER, IDEMPOTENCY_KEY_HEADER, REQUEST_ID_HEADER,
};
use crate::server::response::IDEMPOTENT_REPLAYED;
use crate::server::routes::{
    create_resource, get_dashboard, health_handler, ingest_event, invalidate_dashboard,
    put_layout, query_audit,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub deps: ServerDeps,
    /// Cancelled on shutdown; handlers derive their cancellation from it.
    pub shutdown: CancellationToken,
}

/// Build the Axum application router
///
/// `/health` is public. Everything under `/v1` requires an actor, and
/// mutating methods additionally require an `Idempotency-Key`.
pub fn build_app(deps: ServerDeps, shutdown: CancellationToken) -> Router {
    let state = AppState { deps, shutdown };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            ACTOR_ROLE_HEADER.clone(),
            IDEMPOTENCY_KEY_HEADER.clone(),
            REQUEST_ID_HEADER.clone(),
        ])
        .expose_headers([REQUEST_ID_HEADER.clone(), IDEMPOTENT_REPLAYED.clone()]);

    // Layers run bottom-up: actor resolution before the idempotency check
    let v1 = Router::new()
        .route("/dashboard", get(get_dashboard))
        .route("/dashboard/layout", put(put_layout))
        .route("/dashboard/invalidate", post(invalidate_dashboard))
        .route("/resources", post(create_resource))
        .route("/events", post(ingest_event))
        .route("/audit", get(query_audit))
        .layer(middleware::from_fn(require_idempotency_key))
        .layer(middleware::from_fn(require_actor));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", v1)
        .layer(middleware::from_fn(extract_client_ip))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(middleware::from_fn(assign_request_id))
        .layer(Extension(state))
}
