//! Entity gateway: authorization-gated, parameterized CRUD over relational tables.
//!
//! A request path such as `api/Book/id/1` is split into an entity identifier and a
//! primary-key route, the entity is resolved from a catalog built by introspecting the
//! database, the caller's role is checked against the configured permissions, and the
//! request is compiled into parameterized SQL. Values never reach SQL text.

pub mod auth;
pub mod config;
pub mod error;
pub mod executor;
pub mod extractors;
pub mod filter;
pub mod handlers;
pub mod metadata;
pub mod response;
pub mod route;
pub mod routes;
pub mod service;
pub mod sql;
pub mod state;

pub use auth::{Action, PolicySet, RequestContext};
pub use config::{load_from_path, load_from_str, RuntimeConfig};
pub use error::{ConfigError, DbError, EngineError};
pub use executor::{DbExecutor, DbTransaction, PgExecutor};
pub use metadata::{build_catalog, EntityCatalog, EntityDescriptor, MetadataCatalog};
pub use routes::{common_routes, entity_routes};
pub use service::{EngineRequest, EngineResponse, Operation, QueryEngine, QueryOptions};
pub use state::AppState;
