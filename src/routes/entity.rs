//! Entity routes: every path under the REST base goes to one handler.

use crate::handlers::dispatch;
use crate::state::AppState;
use axum::{routing::any, Router};
use tower_http::limit::RequestBodyLimitLayer;

/// Largest accepted write body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn entity_routes(state: AppState) -> Router {
    Router::new()
        .route("/*route", any(dispatch))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}
