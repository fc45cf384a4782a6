//! Typed SQL values, literal coercion, and sqlx binding.

use crate::metadata::ColumnType;
use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::{Database, Type};

/// A literal that is only ever bound, never spliced into SQL text.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(uuid::Uuid),
    DateTime(DateTime<Utc>),
    Bytes(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// JSON form used in continuation tokens and diagnostics.
    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => Value::Bool(*b),
            SqlValue::Int(n) => Value::Number((*n).into()),
            SqlValue::Float(f) => serde_json::Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            SqlValue::Text(s) => Value::String(s.clone()),
            SqlValue::Uuid(u) => Value::String(u.to_string()),
            SqlValue::DateTime(d) => Value::String(d.to_rfc3339()),
            SqlValue::Bytes(b) => Value::String(base64::engine::general_purpose::STANDARD.encode(b)),
        }
    }
}

/// A bound statement slot: value plus the column's declared storage type, if known.
#[derive(Clone, Debug, PartialEq)]
pub struct DbParameter {
    pub value: SqlValue,
    pub storage_type: Option<String>,
}

impl DbParameter {
    pub fn new(value: SqlValue, storage_type: Option<String>) -> Self {
        DbParameter { value, storage_type }
    }

    pub fn untyped(value: SqlValue) -> Self {
        DbParameter {
            value,
            storage_type: None,
        }
    }

    /// `$n` or `$n::storage_type`.
    pub fn placeholder(&self, n: usize) -> String {
        match &self.storage_type {
            Some(t) => format!("${}::{}", n, t),
            None => format!("${}", n),
        }
    }
}

/// Coerce a JSON value (request body, GraphQL filter, token) to the column's semantic type.
pub fn coerce_json(v: &Value, ty: ColumnType) -> Option<SqlValue> {
    if v.is_null() {
        return Some(SqlValue::Null);
    }
    match ty {
        ColumnType::String => v.as_str().map(|s| SqlValue::Text(s.to_string())),
        ColumnType::Int => v.as_i64().map(SqlValue::Int),
        ColumnType::Float => v.as_f64().map(SqlValue::Float),
        ColumnType::Bool => v.as_bool().map(SqlValue::Bool),
        ColumnType::DateTime | ColumnType::Uuid | ColumnType::Binary => v.as_str().and_then(|s| coerce_text(s, ty)),
    }
}

/// Coerce raw text (route segment) to the column's semantic type.
pub fn coerce_text(s: &str, ty: ColumnType) -> Option<SqlValue> {
    match ty {
        ColumnType::String => Some(SqlValue::Text(s.to_string())),
        ColumnType::Int => s.parse::<i64>().ok().map(SqlValue::Int),
        ColumnType::Float => s.parse::<f64>().ok().filter(|f| f.is_finite()).map(SqlValue::Float),
        ColumnType::Bool => {
            if s.eq_ignore_ascii_case("true") {
                Some(SqlValue::Bool(true))
            } else if s.eq_ignore_ascii_case("false") {
                Some(SqlValue::Bool(false))
            } else {
                None
            }
        }
        ColumnType::DateTime => parse_datetime(s).map(SqlValue::DateTime),
        ColumnType::Uuid => uuid::Uuid::parse_str(s).ok().map(SqlValue::Uuid),
        ColumnType::Binary => base64::engine::general_purpose::STANDARD
            .decode(s)
            .ok()
            .map(SqlValue::Bytes),
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    if let Ok(d) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(d.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}

impl<'q> Encode<'q, Postgres> for SqlValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        Ok(match self {
            SqlValue::Null => <Option<String> as Encode<Postgres>>::encode_by_ref(&None, buf)?,
            SqlValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf)?,
            SqlValue::Int(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            SqlValue::Float(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            SqlValue::Text(s) => <String as Encode<Postgres>>::encode_by_ref(s, buf)?,
            SqlValue::Uuid(u) => <uuid::Uuid as Encode<Postgres>>::encode_by_ref(u, buf)?,
            SqlValue::DateTime(d) => <DateTime<Utc> as Encode<Postgres>>::encode_by_ref(d, buf)?,
            SqlValue::Bytes(b) => <Vec<u8> as Encode<Postgres>>::encode_by_ref(b, buf)?,
        })
    }

    /// Each variant reports its own wire type; the `$n::type` cast adapts it to the column.
    fn produces(&self) -> Option<PgTypeInfo> {
        Some(match self {
            SqlValue::Null | SqlValue::Text(_) => <String as Type<Postgres>>::type_info(),
            SqlValue::Bool(_) => <bool as Type<Postgres>>::type_info(),
            SqlValue::Int(_) => <i64 as Type<Postgres>>::type_info(),
            SqlValue::Float(_) => <f64 as Type<Postgres>>::type_info(),
            SqlValue::Uuid(_) => <uuid::Uuid as Type<Postgres>>::type_info(),
            SqlValue::DateTime(_) => <DateTime<Utc> as Type<Postgres>>::type_info(),
            SqlValue::Bytes(_) => <Vec<u8> as Type<Postgres>>::type_info(),
        })
    }
}

impl Type<Postgres> for SqlValue {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(_ty: &PgTypeInfo) -> bool {
        true
    }
}
