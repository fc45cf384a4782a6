//! Standard response envelope: `{ "data": ..., "meta": { "count", "after"? } }`.

use crate::service::EngineResponse;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Serialize)]
pub struct SuccessOne<T> {
    pub data: T,
}

#[derive(Serialize)]
pub struct SuccessMany<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

#[derive(Serialize)]
pub struct PageMeta {
    pub count: u64,
    /// Continuation token for `$after`; absent on the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

impl IntoResponse for EngineResponse {
    fn into_response(self) -> Response {
        match self {
            EngineResponse::Rows { items, after } => {
                let count = items.len() as u64;
                (
                    StatusCode::OK,
                    Json(SuccessMany {
                        data: items,
                        meta: PageMeta { count, after },
                    }),
                )
                    .into_response()
            }
            EngineResponse::Row(row) => (StatusCode::OK, Json(SuccessOne { data: row })).into_response(),
            EngineResponse::Created(row) => (StatusCode::CREATED, Json(SuccessOne { data: row })).into_response(),
            EngineResponse::Deleted => StatusCode::NO_CONTENT.into_response(),
        }
    }
}
