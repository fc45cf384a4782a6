//! HTTP handlers.

pub mod entity;
pub use entity::dispatch;
