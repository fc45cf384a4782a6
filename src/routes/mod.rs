//! Routers the consumer merges into its app.

mod common;
mod entity;
pub use common::common_routes;
pub use entity::{entity_routes, MAX_BODY_BYTES};
