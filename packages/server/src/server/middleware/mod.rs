// HTTP middleware
pub mod actor;
pub mod idempotency_key;
pub mod ip_extractor;
pub mod request_id;

pub use actor::*;
pub use idempotency_key::*;
pub use ip_extractor::*;
pub use request_id::*;

use axum::extract::Request;
use chassis::ChassisError;

use crate::server::error::ApiError;

/// Error for a request rejected by middleware, tagged with its request id.
fn reject(request: &Request, error: ChassisError) -> ApiError {
    let error = ApiError::from(error);
    match request.extensions().get::<RequestId>() {
        Some(RequestId(id)) => error.with_request_id(id.clone()),
        None => error,
    }
}
