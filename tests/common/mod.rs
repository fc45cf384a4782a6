#![allow(dead_code)]

use async_trait::async_trait;
use entity_gateway::executor::Row;
use entity_gateway::metadata::{ColumnDescriptor, ColumnType};
use entity_gateway::sql::QueryBuf;
use entity_gateway::{
    load_from_str, DbError, DbExecutor, DbTransaction, EntityCatalog, EntityDescriptor, QueryEngine,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the engine asked of the database, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Fetch(String),
    Begin,
    TxFetch(String),
    TxExecute(String),
    Commit,
    Rollback,
}

#[derive(Default)]
struct Script {
    calls: Vec<Call>,
    statements: Vec<QueryBuf>,
    rows: VecDeque<Vec<Row>>,
    affected: VecDeque<u64>,
    failures: VecDeque<DbError>,
    delay: Option<Duration>,
}

/// Executor that records every statement and answers from a script.
#[derive(Clone, Default)]
pub struct RecordingExecutor {
    script: Arc<Mutex<Script>>,
}

impl RecordingExecutor {
    /// Result of the next fetch (pooled or in a transaction). Unscripted fetches return no rows.
    pub fn push_rows(&self, rows: Vec<Value>) {
        let rows = rows.into_iter().map(|v| v.as_object().cloned().unwrap()).collect();
        self.script.lock().unwrap().rows.push_back(rows);
    }

    /// Affected count of the next `execute`. Unscripted executes report 1.
    pub fn push_affected(&self, n: u64) {
        self.script.lock().unwrap().affected.push_back(n);
    }

    /// Fail the next pooled fetch or begin.
    pub fn push_failure(&self, e: DbError) {
        self.script.lock().unwrap().failures.push_back(e);
    }

    pub fn set_delay(&self, d: Duration) {
        self.script.lock().unwrap().delay = Some(d);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn statements(&self) -> Vec<QueryBuf> {
        self.script.lock().unwrap().statements.clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements().into_iter().map(|s| s.sql).collect()
    }

    fn record(&self, call: Call, stmt: Option<&QueryBuf>) -> Option<Duration> {
        let mut s = self.script.lock().unwrap();
        s.calls.push(call);
        if let Some(stmt) = stmt {
            s.statements.push(stmt.clone());
        }
        s.delay
    }

    fn next_failure(&self) -> Option<DbError> {
        self.script.lock().unwrap().failures.pop_front()
    }

    fn next_rows(&self) -> Vec<Row> {
        self.script.lock().unwrap().rows.pop_front().unwrap_or_default()
    }

    fn next_affected(&self) -> u64 {
        self.script.lock().unwrap().affected.pop_front().unwrap_or(1)
    }
}

#[async_trait]
impl DbExecutor for RecordingExecutor {
    async fn fetch_all(&self, stmt: &QueryBuf) -> Result<Vec<Row>, DbError> {
        let delay = self.record(Call::Fetch(stmt.sql.clone()), Some(stmt));
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if let Some(e) = self.next_failure() {
            return Err(e);
        }
        Ok(self.next_rows())
    }

    async fn begin(&self) -> Result<Box<dyn DbTransaction>, DbError> {
        self.record(Call::Begin, None);
        if let Some(e) = self.next_failure() {
            return Err(e);
        }
        Ok(Box::new(RecordingTransaction { inner: self.clone() }))
    }
}

struct RecordingTransaction {
    inner: RecordingExecutor,
}

#[async_trait]
impl DbTransaction for RecordingTransaction {
    async fn fetch_all(&mut self, stmt: &QueryBuf) -> Result<Vec<Row>, DbError> {
        self.inner.record(Call::TxFetch(stmt.sql.clone()), Some(stmt));
        Ok(self.inner.next_rows())
    }

    async fn execute(&mut self, stmt: &QueryBuf) -> Result<u64, DbError> {
        self.inner.record(Call::TxExecute(stmt.sql.clone()), Some(stmt));
        Ok(self.inner.next_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.inner.record(Call::Commit, None);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.inner.record(Call::Rollback, None);
        Ok(())
    }
}

pub fn book() -> EntityDescriptor {
    EntityDescriptor::new(
        "Book",
        "public",
        "books",
        vec![
            ColumnDescriptor::new("id", ColumnType::Int).storage("int4").not_null().generated(),
            ColumnDescriptor::new("title", ColumnType::String).storage("text").not_null(),
            ColumnDescriptor::new("price", ColumnType::Float).storage("numeric"),
            ColumnDescriptor::new("owner", ColumnType::String).storage("text"),
        ],
        vec!["id".into()],
    )
}

pub fn edition() -> EntityDescriptor {
    EntityDescriptor::new(
        "Edition",
        "public",
        "editions",
        vec![
            ColumnDescriptor::new("book_id", ColumnType::Int).storage("int4").not_null(),
            ColumnDescriptor::new("lang", ColumnType::String).storage("text").not_null(),
            ColumnDescriptor::new("pages", ColumnType::Int).storage("int4"),
        ],
        vec!["book_id".into(), "lang".into()],
    )
}

/// Roles used across the tests:
/// - `anonymous` reads Book without `owner`, reads Edition.
/// - `editor` may do everything; updates are limited to rows it owns.
/// - `author` reads only its own books.
/// - `contributor` may create books it owns and read all of them.
pub fn library_config() -> Value {
    json!({
        "rest": { "path": "/api", "default_page_size": 100, "max_page_size": 1000 },
        "database": { "schema": "public", "statement_timeout_ms": 5000, "max_retries": 2 },
        "entities": [
            {
                "name": "Book",
                "source": { "object": "books" },
                "permissions": [
                    { "role": "anonymous",
                      "actions": [ { "action": "read", "fields": { "include": ["*"], "exclude": ["owner"] } } ] },
                    { "role": "editor",
                      "actions": [ "create", "read", "delete",
                                   { "action": "update", "policy": { "database": "@item.owner eq @claims.sub" } } ] },
                    { "role": "author",
                      "actions": [ { "action": "read", "policy": { "database": "@item.owner eq @claims.sub" } } ] },
                    { "role": "contributor",
                      "actions": [ "read",
                                   { "action": "create", "policy": { "database": "@item.owner eq @claims.sub" } } ] }
                ]
            },
            {
                "name": "Edition",
                "source": { "object": "editions" },
                "permissions": [
                    { "role": "anonymous", "actions": ["read"] },
                    { "role": "editor", "actions": ["*"] }
                ]
            }
        ]
    })
}

/// Builds a fresh engine over an in-memory catalog and a recording executor.
pub struct EngineFixture {
    config: Value,
    descriptors: Vec<EntityDescriptor>,
    executor: RecordingExecutor,
}

impl EngineFixture {
    pub fn library() -> Self {
        EngineFixture {
            config: library_config(),
            descriptors: vec![book(), edition()],
            executor: RecordingExecutor::default(),
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn executor(&self) -> RecordingExecutor {
        self.executor.clone()
    }

    pub fn build(self) -> (QueryEngine, RecordingExecutor) {
        let config = load_from_str(&self.config.to_string()).unwrap();
        let catalog = EntityCatalog::from_descriptors(self.descriptors).unwrap();
        let engine = QueryEngine::new(&config, Arc::new(catalog), Arc::new(self.executor.clone())).unwrap();
        (engine, self.executor)
    }
}
