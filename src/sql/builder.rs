//! Builds parameterized SELECT, INSERT, UPDATE, DELETE from entity descriptors and predicate trees.

use crate::filter::PredicateNode;
use crate::metadata::{ColumnDescriptor, EntityDescriptor};
use crate::sql::{DbParameter, SqlValue};

/// Quote identifier for PostgreSQL (safe: only from the catalog).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
fn qualified_table(entity: &EntityDescriptor) -> String {
    format!("{}.{}", quoted(&entity.schema_name), quoted(&entity.table_name))
}

/// Storage types sqlx decodes directly in [`crate::executor`]; anything else is read back as text.
const DECODABLE: &[&str] = &[
    "int2", "int4", "int8", "float4", "float8", "bool", "text", "varchar", "bpchar", "name", "uuid",
    "timestamptz", "timestamp", "date", "json", "jsonb", "bytea",
];

/// Text SQL plus its bound parameters, in placeholder order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<DbParameter>,
}

impl QueryBuf {
    pub fn new() -> Self {
        QueryBuf::default()
    }

    /// Register a parameter and return its placeholder.
    pub fn push_param(&mut self, p: DbParameter) -> String {
        let n = self.params.len() + 1;
        let ph = p.placeholder(n);
        self.params.push(p);
        ph
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderColumn {
    pub column: String,
    pub descending: bool,
}

impl OrderColumn {
    pub fn asc(column: impl Into<String>) -> Self {
        OrderColumn {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        OrderColumn {
            column: column.into(),
            descending: true,
        }
    }
}

/// Render a predicate as a boolean SQL expression, appending its parameters to `q`.
pub fn render_predicate(node: &PredicateNode, q: &mut QueryBuf) -> String {
    match node {
        PredicateNode::Comparison { column, op, param } => {
            let col = quoted(column);
            match (&param.value, op) {
                (SqlValue::Null, crate::filter::ComparisonOp::Eq) => format!("{} IS NULL", col),
                (SqlValue::Null, crate::filter::ComparisonOp::Ne) => format!("{} IS NOT NULL", col),
                _ => {
                    let ph = q.push_param(param.clone());
                    format!("{} {} {}", col, op.sql(), ph)
                }
            }
        }
        PredicateNode::Logical { op, children } => {
            let parts: Vec<String> = children
                .iter()
                .map(|c| format!("({})", render_predicate(c, q)))
                .collect();
            parts.join(&format!(" {} ", op.sql()))
        }
        PredicateNode::Not(inner) => format!("NOT ({})", render_predicate(inner, q)),
    }
}

/// Render a predicate on its own, numbering parameters from `$1`.
pub fn render_where(node: &PredicateNode) -> QueryBuf {
    let mut q = QueryBuf::new();
    q.sql = render_predicate(node, &mut q);
    q
}

fn select_expr(c: &ColumnDescriptor) -> String {
    let q = quoted(&c.name);
    match c.storage_type.as_deref() {
        Some(t) if !DECODABLE.contains(&t) => format!("{}::text AS {}", q, q),
        _ => q,
    }
}

/// Projection list in entity column order, limited to `columns`.
fn column_list(entity: &EntityDescriptor, columns: &[String]) -> String {
    entity
        .columns
        .iter()
        .filter(|c| columns.iter().any(|n| n == &c.name))
        .map(select_expr)
        .collect::<Vec<_>>()
        .join(", ")
}

/// SELECT projection FROM entity WHERE predicate ORDER BY ... LIMIT $n.
pub fn select(
    entity: &EntityDescriptor,
    projection: &[String],
    predicate: Option<&PredicateNode>,
    order: &[OrderColumn],
    limit: Option<u64>,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_clause = predicate
        .map(|p| format!(" WHERE {}", render_predicate(p, &mut q)))
        .unwrap_or_default();
    let order_clause = if order.is_empty() {
        String::new()
    } else {
        let parts: Vec<String> = order
            .iter()
            .map(|o| format!("{} {}", quoted(&o.column), if o.descending { "DESC" } else { "ASC" }))
            .collect();
        format!(" ORDER BY {}", parts.join(", "))
    };
    let limit_clause = limit
        .map(|n| {
            let ph = q.push_param(DbParameter::untyped(SqlValue::Int(n as i64)));
            format!(" LIMIT {}", ph)
        })
        .unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {}{}{}{}",
        column_list(entity, projection),
        qualified_table(entity),
        where_clause,
        order_clause,
        limit_clause
    );
    q
}

/// SELECT 1 ... FOR UPDATE: locks the keyed row (if any) for the rest of the transaction.
pub fn probe_for_update(entity: &EntityDescriptor, key: &PredicateNode) -> QueryBuf {
    let mut q = QueryBuf::new();
    let cond = render_predicate(key, &mut q);
    q.sql = format!("SELECT 1 FROM {} WHERE {} FOR UPDATE", qualified_table(entity), cond);
    q
}

/// SELECT 1 ... WHERE predicate: used to check a freshly written row against a row filter.
pub fn exists(entity: &EntityDescriptor, predicate: &PredicateNode) -> QueryBuf {
    let mut q = QueryBuf::new();
    let cond = render_predicate(predicate, &mut q);
    q.sql = format!("SELECT 1 FROM {} WHERE {}", qualified_table(entity), cond);
    q
}

/// INSERT (cols) VALUES (params) RETURNING projection.
pub fn insert(entity: &EntityDescriptor, values: &[(String, DbParameter)], returning: &[String]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(entity);
    let returning = column_list(entity, returning);
    if values.is_empty() {
        q.sql = format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, returning);
        return q;
    }
    let mut cols = Vec::with_capacity(values.len());
    let mut placeholders = Vec::with_capacity(values.len());
    for (name, p) in values {
        cols.push(quoted(name));
        placeholders.push(q.push_param(p.clone()));
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        table,
        cols.join(", "),
        placeholders.join(", "),
        returning
    );
    q
}

/// UPDATE SET ... WHERE predicate RETURNING projection. With no assignments the first key
/// column is assigned to itself so the row is still matched, locked, and returned.
pub fn update(
    entity: &EntityDescriptor,
    sets: &[(String, DbParameter)],
    predicate: &PredicateNode,
    returning: &[String],
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut assignments = Vec::with_capacity(sets.len().max(1));
    for (name, p) in sets {
        let ph = q.push_param(p.clone());
        assignments.push(format!("{} = {}", quoted(name), ph));
    }
    if assignments.is_empty() {
        if let Some(k) = entity.primary_key.first() {
            assignments.push(format!("{} = {}", quoted(k), quoted(k)));
        }
    }
    let cond = render_predicate(predicate, &mut q);
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} RETURNING {}",
        qualified_table(entity),
        assignments.join(", "),
        cond,
        column_list(entity, returning)
    );
    q
}

/// DELETE FROM entity WHERE predicate.
pub fn delete(entity: &EntityDescriptor, predicate: &PredicateNode) -> QueryBuf {
    let mut q = QueryBuf::new();
    let cond = render_predicate(predicate, &mut q);
    q.sql = format!("DELETE FROM {} WHERE {}", qualified_table(entity), cond);
    q
}
