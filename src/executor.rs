//! Database executor: the only place statements meet a connection.

use crate::error::DbError;
use crate::sql::QueryBuf;
use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Transaction};

/// A result row keyed by column name.
pub type Row = Map<String, Value>;

#[async_trait]
pub trait DbExecutor: Send + Sync {
    async fn fetch_all(&self, stmt: &QueryBuf) -> Result<Vec<Row>, DbError>;

    async fn begin(&self) -> Result<Box<dyn DbTransaction>, DbError>;
}

/// One open transaction. Dropping it without `commit` rolls back.
#[async_trait]
pub trait DbTransaction: Send {
    async fn fetch_all(&mut self, stmt: &QueryBuf) -> Result<Vec<Row>, DbError>;

    /// Run a statement and return the affected row count.
    async fn execute(&mut self, stmt: &QueryBuf) -> Result<u64, DbError>;

    async fn commit(self: Box<Self>) -> Result<(), DbError>;

    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}

#[derive(Clone)]
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        PgExecutor { pool }
    }
}

fn bind(stmt: &QueryBuf) -> sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments> {
    let mut query = sqlx::query(&stmt.sql);
    for p in &stmt.params {
        query = query.bind(p.value.clone());
    }
    query
}

#[async_trait]
impl DbExecutor for PgExecutor {
    async fn fetch_all(&self, stmt: &QueryBuf) -> Result<Vec<Row>, DbError> {
        tracing::debug!(sql = %stmt.sql, params = ?stmt.params, "query");
        let rows = bind(stmt).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn begin(&self) -> Result<Box<dyn DbTransaction>, DbError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl DbTransaction for PgTransaction {
    async fn fetch_all(&mut self, stmt: &QueryBuf) -> Result<Vec<Row>, DbError> {
        tracing::debug!(sql = %stmt.sql, params = ?stmt.params, "query (tx)");
        let rows = bind(stmt).fetch_all(&mut *self.tx).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn execute(&mut self, stmt: &QueryBuf) -> Result<u64, DbError> {
        tracing::debug!(sql = %stmt.sql, params = ?stmt.params, "execute (tx)");
        let done = bind(stmt).execute(&mut *self.tx).await?;
        Ok(done.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn row_to_json(row: &PgRow) -> Row {
    use sqlx::Column;
    use sqlx::Row as _;
    let mut map = Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row as _;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    if let Ok(Some(b)) = row.try_get::<Option<Vec<u8>>, _>(name) {
        return Value::String(base64::engine::general_purpose::STANDARD.encode(b));
    }
    Value::Null
}
