//! Caller identity from request headers (`X-Api-Role`, `X-Api-Claims`).
//!
//! Both headers are trusted as given: the gateway is meant to sit behind a proxy that
//! authenticates the caller and sets them.

use crate::auth::{RequestContext, ANONYMOUS_ROLE};
use crate::error::EngineError;
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use serde_json::Value;

/// Header naming the caller's role. Default: `anonymous`.
pub const ROLE_HEADER: &str = "X-Api-Role";

/// Header carrying a JSON object of claims for `@claims.*` row filters.
pub const CLAIMS_HEADER: &str = "X-Api-Claims";

#[derive(Clone, Debug)]
pub struct Caller(pub RequestContext);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let role = parts
            .headers
            .get(ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| ANONYMOUS_ROLE.to_string());
        let mut ctx = RequestContext::new(role);

        if let Some(raw) = parts.headers.get(CLAIMS_HEADER) {
            let text = raw
                .to_str()
                .map_err(|_| EngineError::BadRequest(format!("{} must be valid UTF-8", CLAIMS_HEADER)))?;
            match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(m)) => ctx.claims = m.into_iter().collect(),
                _ => {
                    return Err(EngineError::BadRequest(format!(
                        "{} must be a JSON object",
                        CLAIMS_HEADER
                    )))
                }
            }
        }
        Ok(Caller(ctx))
    }
}
