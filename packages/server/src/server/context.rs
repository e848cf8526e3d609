//! Per-request context assembled from middleware extensions.

use std::net::IpAddr;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chassis::{Actor, ChassisError};

use crate::server::error::ApiError;
use crate::server::middleware::{ClientIp, IdempotencyKey, RequestId};

#[derive(Clone, Debug)]
pub struct RequestContext {
    pub actor: Actor,
    pub request_id: String,
    pub client_ip: Option<IpAddr>,
    pub idempotency_key: Option<String>,
}

impl RequestContext {
    /// Tag `error` with this request's id.
    pub fn error(&self, error: impl Into<ApiError>) -> ApiError {
        error.into().with_request_id(self.request_id.clone())
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    pub fn ip_address(&self) -> Option<String> {
        self.client_ip.map(|ip| ip.to_string())
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .extensions
            .get::<RequestId>()
            .map(|RequestId(id)| id.clone())
            .unwrap_or_default();
        let actor = match parts.extensions.get::<Actor>() {
            Some(actor) => actor.clone(),
            None => {
                return Err(ApiError::from(ChassisError::Unauthorized).with_request_id(request_id))
            }
        };

        Ok(Self {
            actor,
            request_id,
            client_ip: parts.extensions.get::<ClientIp>().map(|ClientIp(ip)| *ip),
            idempotency_key: parts
                .extensions
                .get::<IdempotencyKey>()
                .map(|IdempotencyKey(key)| key.clone()),
        })
    }
}
