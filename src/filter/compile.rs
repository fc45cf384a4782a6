//! Compile primary-key routes and filter expressions into predicate trees.

use crate::error::EngineError;
use crate::filter::{ComparisonOp, FilterExpr, FilterValue, Literal, LogicalOp, PredicateNode};
use crate::metadata::{ColumnDescriptor, EntityDescriptor};
use crate::route::PrimaryKeyRoute;
use crate::sql::{coerce_json, coerce_text, DbParameter, SqlValue};
use serde_json::Value;
use std::collections::HashMap;

/// Equality on every key column, in the entity's key order.
pub fn compile_primary_key(entity: &EntityDescriptor, route: &PrimaryKeyRoute) -> Result<PredicateNode, EngineError> {
    let exact = route.pairs.len() == entity.primary_key.len()
        && route.columns().all(|c| entity.is_primary_key(c))
        && entity.primary_key.iter().all(|k| route.columns().any(|c| c == k));
    if !exact {
        return Err(EngineError::InvalidField(format!(
            "primary key route for {} must name exactly the key columns [{}], got [{}]",
            entity.name,
            entity.primary_key.join(", "),
            route.columns().collect::<Vec<_>>().join(", ")
        )));
    }

    let mut children = Vec::with_capacity(entity.primary_key.len());
    for key in &entity.primary_key {
        let (_, raw) = route
            .pairs
            .iter()
            .find(|(c, _)| c == key)
            .ok_or_else(|| EngineError::InvalidField(key.clone()))?;
        let column = column_of(entity, key)?;
        let value = coerce_text(raw, column.column_type).ok_or_else(|| mismatch(column, raw))?;
        children.push(PredicateNode::compare(key.clone(), ComparisonOp::Eq, param_for(column, value)));
    }
    PredicateNode::all(children).ok_or_else(|| EngineError::InvalidField(entity.name.clone()))
}

/// Compile a parsed filter. `claims` supplies `@claims.*` values for policy expressions;
/// a referenced claim that is absent denies access.
pub fn compile_filter(
    entity: &EntityDescriptor,
    expr: &FilterExpr,
    claims: &HashMap<String, Value>,
) -> Result<PredicateNode, EngineError> {
    match expr {
        FilterExpr::Compare { field, op, value } => {
            let column = column_of(entity, field)?;
            let sql_value = match value {
                FilterValue::Literal(lit) => coerce_literal(column, lit)?,
                FilterValue::Claim(name) => {
                    let Some(claim) = claims.get(name) else {
                        tracing::debug!(claim = %name, entity = %entity.name, "row filter references a missing claim");
                        return Err(EngineError::Forbidden);
                    };
                    coerce_json(claim, column.column_type).ok_or_else(|| {
                        tracing::debug!(claim = %name, entity = %entity.name, "claim value does not fit column type");
                        EngineError::Forbidden
                    })?
                }
            };
            if sql_value.is_null() && !matches!(op, ComparisonOp::Eq | ComparisonOp::Ne) {
                return Err(EngineError::TypeMismatch {
                    field: field.clone(),
                    value: "null".into(),
                    expected: "non-null value for an ordering comparison",
                });
            }
            Ok(PredicateNode::compare(field.clone(), *op, param_for(column, sql_value)))
        }
        FilterExpr::And(children) => logical(entity, LogicalOp::And, children, claims),
        FilterExpr::Or(children) => logical(entity, LogicalOp::Or, children, claims),
        FilterExpr::Not(inner) => Ok(PredicateNode::Not(Box::new(compile_filter(entity, inner, claims)?))),
    }
}

fn logical(
    entity: &EntityDescriptor,
    op: LogicalOp,
    children: &[FilterExpr],
    claims: &HashMap<String, Value>,
) -> Result<PredicateNode, EngineError> {
    let children = children
        .iter()
        .map(|c| compile_filter(entity, c, claims))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(PredicateNode::Logical { op, children })
}

fn column_of<'a>(entity: &'a EntityDescriptor, field: &str) -> Result<&'a ColumnDescriptor, EngineError> {
    entity
        .column(field)
        .ok_or_else(|| EngineError::InvalidField(format!("{} is not a field of {}", field, entity.name)))
}

fn coerce_literal(column: &ColumnDescriptor, lit: &Literal) -> Result<SqlValue, EngineError> {
    coerce_json(&lit.to_json(), column.column_type).ok_or_else(|| {
        let shown = match lit {
            Literal::Str(s) => s.clone(),
            other => other.to_json().to_string(),
        };
        mismatch(column, &shown)
    })
}

fn mismatch(column: &ColumnDescriptor, raw: &str) -> EngineError {
    EngineError::TypeMismatch {
        field: column.name.clone(),
        value: raw.to_string(),
        expected: column.column_type.name(),
    }
}

pub(crate) fn param_for(column: &ColumnDescriptor, value: SqlValue) -> DbParameter {
    DbParameter::new(value, column.storage_type.clone())
}
