//! Shared application state for all routes. The engine swaps its catalog snapshot in place.

use crate::service::QueryEngine;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QueryEngine>,
}

impl AppState {
    pub fn new(engine: QueryEngine) -> Self {
        AppState {
            engine: Arc::new(engine),
        }
    }
}
