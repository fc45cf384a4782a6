//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Message returned for every authorization denial. The failing rule is never exposed.
pub const FORBIDDEN_MESSAGE: &str = "Authorization Failure: Access Not Allowed.";

/// Message returned for every executor failure.
pub const DATABASE_ERROR_MESSAGE: &str =
    "While processing your request the database ran into an error.";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid primary key: entity {entity} column {column}")]
    InvalidPrimaryKey { entity: String, column: String },
    #[error("duplicate entity: {0}")]
    DuplicateEntity(String),
    #[error("invalid policy for entity {entity}: {message}")]
    InvalidPolicy { entity: String, message: String },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("introspection: {0}")]
    Introspection(#[from] sqlx::Error),
}

/// Failure reported by a [`crate::executor::DbExecutor`].
#[derive(Error, Debug)]
pub enum DbError {
    #[error("connection failure: {0}")]
    Connection(String),
    #[error("statement timed out after {0:?}")]
    Timeout(Duration),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("{0}")]
    Other(String),
}

impl DbError {
    /// Connection-level failures may be retried; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Connection(_))
    }
}

impl From<sqlx::Error> for DbError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => DbError::Connection(e.to_string()),
            sqlx::Error::Database(ref db) => match db.kind() {
                sqlx::error::ErrorKind::UniqueViolation
                | sqlx::error::ErrorKind::ForeignKeyViolation
                | sqlx::error::ErrorKind::NotNullViolation
                | sqlx::error::ErrorKind::CheckViolation => DbError::Constraint(db.message().to_string()),
                _ => DbError::Other(e.to_string()),
            },
            other => DbError::Other(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid Path for route: {0}.")]
    InvalidRoute(String),
    #[error("Invalid Entity path: {0}.")]
    EntityNotFound(String),
    #[error("invalid field: {0}")]
    InvalidField(String),
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),
    #[error("type mismatch: value '{value}' for field '{field}' is not a valid {expected}")]
    TypeMismatch {
        field: String,
        value: String,
        expected: &'static str,
    },
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{}", FORBIDDEN_MESSAGE)]
    Forbidden,
    #[error("database: {0}")]
    Database(#[from] DbError),
}

/// Machine-readable sub-status carried next to the HTTP status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubStatus {
    BadRequest,
    EntityNotFound,
    AuthorizationFailure,
    DatabaseError,
}

impl SubStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubStatus::BadRequest => "BadRequest",
            SubStatus::EntityNotFound => "EntityNotFound",
            SubStatus::AuthorizationFailure => "AuthorizationFailure",
            SubStatus::DatabaseError => "DatabaseError",
        }
    }
}

impl EngineError {
    pub fn status(&self) -> StatusCode {
        match self {
            EngineError::InvalidRoute(_)
            | EngineError::InvalidField(_)
            | EngineError::UnsupportedOperator(_)
            | EngineError::TypeMismatch { .. }
            | EngineError::BadRequest(_) => StatusCode::BAD_REQUEST,
            EngineError::EntityNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Forbidden => StatusCode::FORBIDDEN,
            EngineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn sub_status(&self) -> SubStatus {
        match self {
            EngineError::EntityNotFound(_) => SubStatus::EntityNotFound,
            EngineError::Forbidden => SubStatus::AuthorizationFailure,
            EngineError::Database(_) => SubStatus::DatabaseError,
            _ => SubStatus::BadRequest,
        }
    }

    /// Text safe to hand back to the caller.
    pub fn public_message(&self) -> String {
        match self {
            EngineError::Database(_) => DATABASE_ERROR_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.sub_status().as_str().to_string(),
                message: self.public_message(),
                details: None,
            },
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_errors_are_sanitized() {
        let err = EngineError::Database(DbError::Other("relation \"secret_table\" does not exist".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.sub_status(), SubStatus::DatabaseError);
        assert!(!err.public_message().contains("secret_table"));
    }

    #[test]
    fn invalid_route_message_names_the_route() {
        let err = EngineError::InvalidRoute("/foo/bar".into());
        assert_eq!(err.to_string(), "Invalid Path for route: /foo/bar.");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.sub_status().as_str(), "BadRequest");
    }

    #[test]
    fn only_connection_failures_are_transient() {
        assert!(DbError::Connection("reset".into()).is_transient());
        assert!(!DbError::Constraint("duplicate key".into()).is_transient());
        assert!(!DbError::Timeout(Duration::from_secs(1)).is_transient());
    }
}
