//! Engine inputs and outputs, independent of the HTTP layer.

use crate::auth::Action;
use crate::executor::Row;
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Find,
    Insert,
    /// Row must exist.
    Update,
    /// Replace: update the keyed row or insert it. On update, omitted nullable columns the
    /// role may update become NULL; on insert they take their defaults.
    Upsert,
    /// Merge: update only the given columns, or insert the row.
    UpsertIncremental,
    Delete,
}

impl Operation {
    /// Actions the caller must hold. Upserts need both.
    pub fn required_actions(self) -> &'static [Action] {
        match self {
            Operation::Find => &[Action::Read],
            Operation::Insert => &[Action::Create],
            Operation::Update => &[Action::Update],
            Operation::Upsert | Operation::UpsertIncremental => &[Action::Update, Action::Create],
            Operation::Delete => &[Action::Delete],
        }
    }

    pub fn is_write(self) -> bool {
        !matches!(self, Operation::Find)
    }
}

/// `$filter`, `$select`, `$orderby`, `$first`, `$after`, plus an optional GraphQL-style filter object.
#[derive(Clone, Debug, Default)]
pub struct QueryOptions {
    pub filter: Option<String>,
    pub graphql_filter: Option<Value>,
    pub select: Option<String>,
    pub order_by: Option<String>,
    pub first: Option<i64>,
    pub after: Option<String>,
}

impl QueryOptions {
    pub fn has_pagination(&self) -> bool {
        self.first.is_some() || self.after.is_some() || self.order_by.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct EngineRequest {
    pub operation: Operation,
    /// Path without the leading `/`, e.g. `api/Book/id/1`.
    pub route: String,
    pub options: QueryOptions,
    pub body: Option<Value>,
}

impl EngineRequest {
    pub fn new(operation: Operation, route: impl Into<String>) -> Self {
        EngineRequest {
            operation,
            route: route.into(),
            options: QueryOptions::default(),
            body: None,
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum EngineResponse {
    /// Collection read; `after` is set when another page follows.
    Rows { items: Vec<Row>, after: Option<String> },
    /// By-key read, or the row an update wrote.
    Row(Row),
    /// Row written by an insert or by the insert branch of an upsert.
    Created(Row),
    Deleted,
}
