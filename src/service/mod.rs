//! QueryEngine: generic CRUD over catalog entities using the safe SQL builder.

mod engine;
pub mod pagination;
mod request;
mod validation;

pub use engine::{EngineSnapshot, QueryEngine};
pub use request::{EngineRequest, EngineResponse, Operation, QueryOptions};
pub use validation::PayloadValidator;
