//! Entity handler: one catch-all route; the method picks the operation.

use crate::error::EngineError;
use crate::extractors::Caller;
use crate::service::{EngineRequest, Operation, QueryOptions};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

fn operation_for(method: &Method) -> Option<Operation> {
    Some(match *method {
        Method::GET => Operation::Find,
        Method::POST => Operation::Insert,
        Method::PUT => Operation::Upsert,
        Method::PATCH => Operation::UpsertIncremental,
        Method::DELETE => Operation::Delete,
        _ => return None,
    })
}

fn query_options(params: HashMap<String, String>) -> Result<QueryOptions, EngineError> {
    let mut options = QueryOptions::default();
    for (k, v) in params {
        match k.as_str() {
            "$filter" => options.filter = Some(v),
            "$select" => options.select = Some(v),
            "$orderby" => options.order_by = Some(v),
            "$after" => options.after = Some(v),
            "$first" => {
                let n = v
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| EngineError::BadRequest(format!("$first must be an integer, got '{}'", v)))?;
                options.first = Some(n);
            }
            other if other.starts_with('$') => {
                return Err(EngineError::BadRequest(format!("unsupported query parameter: {}", other)));
            }
            _ => {}
        }
    }
    Ok(options)
}

fn body_json(body: &Bytes) -> Result<Option<Value>, EngineError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| EngineError::BadRequest(format!("request body is not valid JSON: {}", e)))
}

pub async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    Path(route): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    Caller(ctx): Caller,
    body: Bytes,
) -> Result<Response, EngineError> {
    let Some(operation) = operation_for(&method) else {
        return Ok(StatusCode::METHOD_NOT_ALLOWED.into_response());
    };
    let options = query_options(params)?;
    let mut request = EngineRequest::new(operation, route).with_options(options);
    if operation.is_write() {
        if let Some(v) = body_json(&body)? {
            request = request.with_body(v);
        }
    }
    let timeout = Duration::from_millis(state.engine.rest().request_timeout_ms);
    let ctx = ctx.with_deadline(Instant::now() + timeout);
    let response = state.engine.execute(&ctx, request).await?;
    Ok(response.into_response())
}
