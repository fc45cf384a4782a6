mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use common::{Call, EngineFixture, RecordingExecutor};
use entity_gateway::error::{DATABASE_ERROR_MESSAGE, FORBIDDEN_MESSAGE};
use entity_gateway::extractors::{CLAIMS_HEADER, ROLE_HEADER};
use entity_gateway::{common_routes, entity_routes, AppState, DbError};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> (Router, RecordingExecutor) {
    let (engine, db) = EngineFixture::library().build();
    let router = common_routes().merge(entity_routes(AppState::new(engine)));
    (router, db)
}

async fn send(router: Router, req: Request<Body>) -> (StatusCode, Option<Value>) {
    let resp = router.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        None
    } else {
        Some(serde_json::from_slice(&bytes).unwrap())
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn as_editor(method: Method, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(ROLE_HEADER, "editor")
        .header(CLAIMS_HEADER, r#"{"sub":"alice"}"#)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn collection_read_uses_the_page_envelope() {
    let (router, db) = app();
    db.push_rows(vec![json!({ "id": 1, "title": "A" }), json!({ "id": 2, "title": "B" })]);
    let (status, body) = send(router, get("/api/Book?$first=1&$select=title")).await;
    assert_eq!(status, StatusCode::OK);
    let body = body.unwrap();
    assert_eq!(body["data"], json!([{ "title": "A" }]));
    assert_eq!(body["meta"]["count"], json!(1));
    assert!(body["meta"]["after"].is_string());
}

#[tokio::test]
async fn last_page_has_no_token() {
    let (router, db) = app();
    db.push_rows(vec![json!({ "id": 1, "title": "A", "price": null })]);
    let (status, body) = send(router, get("/api/Book")).await;
    assert_eq!(status, StatusCode::OK);
    let body = body.unwrap();
    assert_eq!(body["meta"], json!({ "count": 1 }));
}

#[tokio::test]
async fn read_by_key_returns_a_single_object() {
    let (router, db) = app();
    db.push_rows(vec![json!({ "id": 1, "title": "Dune", "price": "9.50" })]);
    let (status, body) = send(router, get("/api/Book/id/1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap()["data"]["title"], json!("Dune"));
}

#[tokio::test]
async fn error_statuses_and_codes() {
    let (router, _db) = app();

    let (status, body) = send(router.clone(), get("/api/Author")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body.unwrap()["error"]["code"], json!("EntityNotFound"));

    let (status, body) = send(router.clone(), get("/rest/Book")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.unwrap()["error"]["message"], json!("Invalid Path for route: rest/Book."));

    let req = Request::builder()
        .uri("/api/Book")
        .header(ROLE_HEADER, "stranger")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(router.clone(), req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let body = body.unwrap();
    assert_eq!(body["error"]["code"], json!("AuthorizationFailure"));
    assert_eq!(body["error"]["message"], json!(FORBIDDEN_MESSAGE));

    let (status, _) = send(router.clone(), get("/api/Book?$top=3")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let req = Request::builder()
        .uri("/api/Book")
        .header(CLAIMS_HEADER, "not json")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(router, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn database_failures_are_sanitized() {
    let (router, db) = app();
    db.push_failure(DbError::Other("relation \"books\" does not exist".into()));
    let (status, body) = send(router, get("/api/Book")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = body.unwrap();
    assert_eq!(body["error"]["code"], json!("DatabaseError"));
    assert_eq!(body["error"]["message"], json!(DATABASE_ERROR_MESSAGE));
}

#[tokio::test]
async fn writes_map_to_statuses() {
    let (router, db) = app();

    db.push_rows(vec![json!({ "id": 5, "title": "Dune", "price": null, "owner": null })]);
    let (status, body) = send(router.clone(), as_editor(Method::POST, "/api/Book", r#"{"title":"Dune"}"#)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body.unwrap()["data"]["id"], json!(5));

    let (status, body) = send(router.clone(), as_editor(Method::DELETE, "/api/Book/id/5", "")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, None);

    let (status, _) = send(router.clone(), as_editor(Method::POST, "/api/Book", "{oops")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(router, as_editor(Method::OPTIONS, "/api/Book", "")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    assert_eq!(
        db.calls().iter().filter(|c| matches!(c, Call::Commit)).count(),
        2
    );
}

#[tokio::test]
async fn health_and_version() {
    let (router, _db) = app();
    let (status, body) = send(router.clone(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap(), json!({ "status": "ok" }));

    let (status, body) = send(router, get("/version")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap()["name"], json!("entity-gateway"));
}
