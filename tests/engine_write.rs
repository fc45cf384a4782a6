mod common;

use common::{Call, EngineFixture};
use entity_gateway::sql::SqlValue;
use entity_gateway::{EngineError, EngineRequest, EngineResponse, Operation, RequestContext};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn write(op: Operation, route: &str, body: Value) -> EngineRequest {
    EngineRequest::new(op, route).with_body(body)
}

fn editor() -> RequestContext {
    RequestContext::new("editor").with_claim("sub", json!("alice"))
}

const BOOK_RETURNING: &str = "RETURNING \"id\", \"title\", \"price\"::text AS \"price\", \"owner\"";

#[tokio::test]
async fn insert_returns_the_created_row() {
    let (engine, db) = EngineFixture::library().build();
    db.push_rows(vec![json!({ "id": 5, "title": "Dune", "price": "9.50", "owner": null })]);
    let resp = engine
        .execute(
            &editor(),
            write(Operation::Insert, "api/Book", json!({ "title": "Dune", "price": 9.5 })),
        )
        .await
        .unwrap();
    let EngineResponse::Created(row) = resp else {
        panic!("expected a created row, got {:?}", resp);
    };
    assert_eq!(row.get("id"), Some(&json!(5)));

    let insert = format!(
        "INSERT INTO \"public\".\"books\" (\"price\", \"title\") VALUES ($1::numeric, $2::text) {}",
        BOOK_RETURNING
    );
    assert_eq!(db.calls(), vec![Call::Begin, Call::TxFetch(insert), Call::Commit]);
    let values: Vec<SqlValue> = db.statements()[0].params.iter().map(|p| p.value.clone()).collect();
    assert_eq!(values, vec![SqlValue::Float(9.5), SqlValue::Text("Dune".into())]);
}

#[tokio::test]
async fn invalid_inserts_never_open_a_transaction() {
    let (engine, db) = EngineFixture::library().build();
    let cases = [
        (editor(), "api/Book", json!({ "id": 9, "title": "Generated key" })),
        (editor(), "api/Book", json!({ "price": 1.0 })),
        (editor(), "api/Book", json!({ "title": 42 })),
        (editor(), "api/Book", json!({ "isbn": "x" })),
        (editor(), "api/Book", json!(["not", "an", "object"])),
        (editor(), "api/Book/id/1", json!({ "title": "Keyed" })),
        (RequestContext::anonymous(), "api/Book", json!({ "title": "Nope" })),
    ];
    for (ctx, route, body) in cases {
        let result = engine.execute(&ctx, write(Operation::Insert, route, body.clone())).await;
        assert!(result.is_err(), "{} {}", route, body);
    }
    assert!(db.calls().is_empty());
}

#[tokio::test]
async fn partial_keys_are_rejected_before_any_statement() {
    let (engine, db) = EngineFixture::library().build();
    let err = engine
        .execute(
            &editor(),
            write(Operation::Update, "api/Edition/book_id/7", json!({ "pages": 10 })),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidField(_)));

    let err = engine
        .execute(&editor(), EngineRequest::new(Operation::Delete, "api/Edition/lang/en"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidField(_)));

    let err = engine
        .execute(&editor(), EngineRequest::new(Operation::Delete, "api/Edition"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidField(_)));

    assert!(db.calls().is_empty());
}

#[tokio::test]
async fn update_is_scoped_by_the_row_filter() {
    let (engine, db) = EngineFixture::library().build();
    let err = engine
        .execute(
            &editor(),
            write(Operation::Update, "api/Book/id/3", json!({ "title": "New" })),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::EntityNotFound(_)));

    let update = format!(
        "UPDATE \"public\".\"books\" SET \"title\" = $1::text WHERE (\"id\" = $2::int4) AND (\"owner\" = $3::text) {}",
        BOOK_RETURNING
    );
    assert_eq!(db.calls(), vec![Call::Begin, Call::TxFetch(update), Call::Rollback]);
    assert_eq!(db.statements()[0].params[2].value, SqlValue::Text("alice".into()));
}

#[tokio::test]
async fn update_without_the_claim_is_forbidden() {
    let (engine, db) = EngineFixture::library().build();
    let err = engine
        .execute(
            &RequestContext::new("editor"),
            write(Operation::Update, "api/Book/id/3", json!({ "title": "New" })),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden));
    assert!(db.calls().is_empty());
}

#[tokio::test]
async fn body_key_must_agree_with_route() {
    let (engine, db) = EngineFixture::library().build();
    let err = engine
        .execute(
            &editor(),
            write(Operation::Update, "api/Edition/book_id/7/lang/en", json!({ "book_id": 8 })),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::BadRequest(_)));
    assert!(db.calls().is_empty());

    db.push_rows(vec![json!({ "book_id": 7, "lang": "en", "pages": 12 })]);
    engine
        .execute(
            &editor(),
            write(
                Operation::Update,
                "api/Edition/book_id/7/lang/en",
                json!({ "book_id": 7, "pages": 12 }),
            ),
        )
        .await
        .unwrap();
    assert_eq!(
        db.sql(),
        vec![
            "UPDATE \"public\".\"editions\" SET \"pages\" = $1::int4 WHERE (\"book_id\" = $2::int4) AND (\"lang\" = $3::text) \
             RETURNING \"book_id\", \"lang\", \"pages\""
        ]
    );
}

#[tokio::test]
async fn delete_reports_missing_rows() {
    let (engine, db) = EngineFixture::library().build();
    let resp = engine
        .execute(&editor(), EngineRequest::new(Operation::Delete, "api/Book/id/3"))
        .await
        .unwrap();
    assert_eq!(resp, EngineResponse::Deleted);

    db.push_affected(0);
    let err = engine
        .execute(&editor(), EngineRequest::new(Operation::Delete, "api/Book/id/4"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::EntityNotFound(_)));

    let delete = "DELETE FROM \"public\".\"books\" WHERE \"id\" = $1::int4".to_string();
    assert_eq!(
        db.calls(),
        vec![
            Call::Begin,
            Call::TxExecute(delete.clone()),
            Call::Commit,
            Call::Begin,
            Call::TxExecute(delete),
            Call::Rollback,
        ]
    );
}

#[tokio::test]
async fn upsert_inserts_when_the_key_is_free() {
    let (engine, db) = EngineFixture::library().build();
    db.push_rows(vec![]);
    db.push_rows(vec![json!({ "book_id": 7, "lang": "en", "pages": 320 })]);
    let resp = engine
        .execute(
            &editor(),
            write(Operation::Upsert, "api/Edition/book_id/7/lang/en", json!({ "pages": 320 })),
        )
        .await
        .unwrap();
    assert!(matches!(resp, EngineResponse::Created(_)));
    assert_eq!(
        db.calls(),
        vec![
            Call::Begin,
            Call::TxFetch(
                "SELECT 1 FROM \"public\".\"editions\" WHERE (\"book_id\" = $1::int4) AND (\"lang\" = $2::text) FOR UPDATE"
                    .into()
            ),
            Call::TxFetch(
                "INSERT INTO \"public\".\"editions\" (\"book_id\", \"lang\", \"pages\") VALUES ($1::int4, $2::text, $3::int4) \
                 RETURNING \"book_id\", \"lang\", \"pages\""
                    .into()
            ),
            Call::Commit,
        ]
    );
}

#[tokio::test]
async fn replace_nulls_omitted_columns_but_merge_does_not() {
    let (engine, db) = EngineFixture::library().build();
    db.push_rows(vec![json!({ "?column?": 1 })]);
    db.push_rows(vec![json!({ "book_id": 7, "lang": "en", "pages": null })]);
    let resp = engine
        .execute(&editor(), write(Operation::Upsert, "api/Edition/book_id/7/lang/en", json!({})))
        .await
        .unwrap();
    assert!(matches!(resp, EngineResponse::Row(_)));

    db.push_rows(vec![json!({ "?column?": 1 })]);
    db.push_rows(vec![json!({ "book_id": 7, "lang": "en", "pages": 10 })]);
    engine
        .execute(
            &editor(),
            write(Operation::UpsertIncremental, "api/Edition/book_id/7/lang/en", json!({})),
        )
        .await
        .unwrap();

    let sql = db.sql();
    assert_eq!(
        sql[1],
        "UPDATE \"public\".\"editions\" SET \"pages\" = $1::int4 WHERE (\"book_id\" = $2::int4) AND (\"lang\" = $3::text) \
         RETURNING \"book_id\", \"lang\", \"pages\""
    );
    assert_eq!(db.statements()[1].params[0].value, SqlValue::Null);
    assert_eq!(
        sql[3],
        "UPDATE \"public\".\"editions\" SET \"book_id\" = \"book_id\" WHERE (\"book_id\" = $1::int4) AND (\"lang\" = $2::text) \
         RETURNING \"book_id\", \"lang\", \"pages\""
    );
}

#[tokio::test]
async fn upsert_over_a_row_outside_the_update_filter_is_forbidden() {
    let (engine, db) = EngineFixture::library().build();
    db.push_rows(vec![json!({ "?column?": 1 })]);
    let err = engine
        .execute(
            &editor(),
            write(Operation::UpsertIncremental, "api/Book/id/3", json!({ "title": "Mine now" })),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden));
    let calls = db.calls();
    assert_eq!(calls.first(), Some(&Call::Begin));
    assert_eq!(calls.last(), Some(&Call::Rollback));
    assert_eq!(calls.len(), 4);
}

#[tokio::test]
async fn upsert_needs_update_and_create() {
    let (engine, db) = EngineFixture::library().build();
    let ctx = RequestContext::new("contributor").with_claim("sub", json!("alice"));
    let err = engine
        .execute(&ctx, write(Operation::Upsert, "api/Book/id/3", json!({ "title": "T" })))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden));
    assert!(db.calls().is_empty());
}

#[tokio::test]
async fn created_rows_must_satisfy_the_create_filter() {
    let (engine, db) = EngineFixture::library().build();
    let ctx = RequestContext::new("contributor").with_claim("sub", json!("alice"));

    db.push_rows(vec![json!({ "id": 7, "title": "T", "price": null, "owner": "bob" })]);
    db.push_rows(vec![]);
    let err = engine
        .execute(
            &ctx,
            write(Operation::Insert, "api/Book", json!({ "title": "T", "owner": "bob" })),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden));
    let calls = db.calls();
    assert_eq!(
        calls[2],
        Call::TxFetch("SELECT 1 FROM \"public\".\"books\" WHERE (\"id\" = $1::int4) AND (\"owner\" = $2::text)".into())
    );
    assert_eq!(calls[3], Call::Rollback);

    db.push_rows(vec![json!({ "id": 8, "title": "T", "price": null, "owner": "alice" })]);
    db.push_rows(vec![json!({ "?column?": 1 })]);
    let resp = engine
        .execute(
            &ctx,
            write(Operation::Insert, "api/Book", json!({ "title": "T", "owner": "alice" })),
        )
        .await
        .unwrap();
    assert!(matches!(resp, EngineResponse::Created(_)));
    assert_eq!(db.calls().last(), Some(&Call::Commit));
}

#[tokio::test]
async fn replace_only_nulls_columns_the_role_may_update() {
    let mut config = common::library_config();
    config["entities"][0]["permissions"]
        .as_array_mut()
        .unwrap()
        .push(json!({
            "role": "clerk",
            "actions": [
                { "action": "update", "fields": { "include": ["id", "title", "price"] } },
                { "action": "create", "fields": { "include": ["id", "title", "price"] } }
            ]
        }));
    let (engine, db) = EngineFixture::library().with_config(config).build();
    db.push_rows(vec![json!({ "?column?": 1 })]);
    db.push_rows(vec![json!({ "id": 1 })]);
    let resp = engine
        .execute(
            &RequestContext::new("clerk"),
            write(Operation::Upsert, "api/Book/id/1", json!({ "title": "X" })),
        )
        .await
        .unwrap();
    assert_eq!(resp, EngineResponse::Row(json!({ "id": 1 }).as_object().cloned().unwrap()));
    assert_eq!(
        db.sql()[1],
        "UPDATE \"public\".\"books\" SET \"title\" = $1::text, \"price\" = $2::numeric WHERE \"id\" = $3::int4 RETURNING \"id\""
    );
}

#[tokio::test]
async fn upsert_cannot_insert_a_caller_chosen_generated_key() {
    let (engine, db) = EngineFixture::library().build();
    let err = engine
        .execute(&editor(), write(Operation::Upsert, "api/Book/id/99", json!({ "title": "T" })))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::BadRequest(_)));
    assert_eq!(
        db.calls(),
        vec![
            Call::Begin,
            Call::TxFetch("SELECT 1 FROM \"public\".\"books\" WHERE \"id\" = $1::int4 FOR UPDATE".into()),
            Call::Rollback,
        ]
    );
}

#[tokio::test]
async fn role_without_an_entry_learns_nothing_about_columns() {
    let (engine, db) = EngineFixture::library().build();
    let stranger = RequestContext::new("stranger");
    for body in [json!({ "secretcolumn": 1 }), json!({ "title": "T" })] {
        let err = engine
            .execute(&stranger, write(Operation::Insert, "api/Book", body))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden));
    }
    let err = engine
        .execute(&stranger, write(Operation::UpsertIncremental, "api/Book/id/1", json!({ "nosuch": 1 })))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden));
    assert!(db.calls().is_empty());
}
