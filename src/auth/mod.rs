//! Role-scoped authorization: who may do what to which columns and rows.

mod policy;

pub use policy::{Allowed, PolicySet};

use serde_json::Value;
use std::collections::HashMap;
use tokio::time::Instant;

/// Role used when the caller does not name one.
pub const ANONYMOUS_ROLE: &str = "anonymous";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Create, Action::Read, Action::Update, Action::Delete];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

/// Caller identity for one request.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub role: String,
    /// Values for `@claims.<name>` in row filters.
    pub claims: HashMap<String, Value>,
    pub deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(role: impl Into<String>) -> Self {
        RequestContext {
            role: role.into(),
            claims: HashMap::new(),
            deadline: None,
        }
    }

    pub fn anonymous() -> Self {
        RequestContext::new(ANONYMOUS_ROLE)
    }

    pub fn with_claim(mut self, name: impl Into<String>, value: Value) -> Self {
        self.claims.insert(name.into(), value);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}
