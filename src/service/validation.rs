//! Write payload validation against the entity descriptor.

use crate::error::EngineError;
use crate::filter::{ComparisonOp, PredicateNode};
use crate::metadata::EntityDescriptor;
use crate::sql::{coerce_json, DbParameter, SqlValue};
use serde_json::{Map, Value};

pub struct PayloadValidator;

impl PayloadValidator {
    /// Body must be a JSON object.
    pub fn object(body: Option<&Value>) -> Result<&Map<String, Value>, EngineError> {
        match body {
            Some(Value::Object(m)) => Ok(m),
            Some(_) => Err(EngineError::BadRequest("request body must be a JSON object".into())),
            None => Err(EngineError::BadRequest("request body is required".into())),
        }
    }

    /// Every key is a writable column and every value fits its column.
    /// Returns `(column, parameter)` in payload order.
    pub fn coerce(
        entity: &EntityDescriptor,
        payload: &Map<String, Value>,
    ) -> Result<Vec<(String, DbParameter)>, EngineError> {
        let mut out = Vec::with_capacity(payload.len());
        for (name, v) in payload {
            let column = entity
                .column(name)
                .ok_or_else(|| EngineError::InvalidField(format!("{} is not a field of {}", name, entity.name)))?;
            if column.is_generated {
                return Err(EngineError::BadRequest(format!(
                    "{} is generated by the database and cannot be written",
                    name
                )));
            }
            let value = coerce_json(v, column.column_type).ok_or_else(|| EngineError::TypeMismatch {
                field: name.clone(),
                value: v.to_string(),
                expected: column.column_type.name(),
            })?;
            if value.is_null() && !column.nullable {
                return Err(EngineError::BadRequest(format!("{} cannot be null", name)));
            }
            out.push((name.clone(), DbParameter::new(value, column.storage_type.clone())));
        }
        Ok(out)
    }

    /// Columns an insert must supply are present.
    pub fn require_insert_columns(
        entity: &EntityDescriptor,
        values: &[(String, DbParameter)],
    ) -> Result<(), EngineError> {
        let missing: Vec<&str> = entity
            .columns
            .iter()
            .filter(|c| c.is_required_on_insert() && !values.iter().any(|(n, _)| n == &c.name))
            .map(|c| c.name.as_str())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(EngineError::BadRequest(format!(
                "missing required field(s) for {}: {}",
                entity.name,
                missing.join(", ")
            )))
        }
    }

    /// Key columns in the payload must agree with the key route. Returns the payload
    /// without them.
    pub fn strip_key(
        key: &PredicateNode,
        values: Vec<(String, DbParameter)>,
    ) -> Result<Vec<(String, DbParameter)>, EngineError> {
        let key_values = key_equalities(key);
        let mut out = Vec::with_capacity(values.len());
        for (name, p) in values {
            match key_values.iter().find(|(c, _)| *c == name) {
                Some((_, route_value)) if *route_value == &p.value => {}
                Some(_) => {
                    return Err(EngineError::BadRequest(format!(
                        "{} in the body does not match the primary key route",
                        name
                    )))
                }
                None => out.push((name, p)),
            }
        }
        Ok(out)
    }

    /// Key route equalities as insert values, for the insert branch of an upsert.
    pub fn key_values(key: &PredicateNode) -> Vec<(String, DbParameter)> {
        let mut out = Vec::new();
        collect_key(key, &mut out);
        out
    }

    /// Replace semantics: every nullable column in `writable` missing from `values` is set
    /// to NULL. Columns outside `writable` are left as they are.
    pub fn null_fill(entity: &EntityDescriptor, values: &mut Vec<(String, DbParameter)>, writable: &[String]) {
        for c in &entity.columns {
            if c.is_primary_key || c.is_generated || !c.nullable || !writable.contains(&c.name) {
                continue;
            }
            if !values.iter().any(|(n, _)| n == &c.name) {
                values.push((c.name.clone(), DbParameter::new(SqlValue::Null, c.storage_type.clone())));
            }
        }
    }
}

fn key_equalities(key: &PredicateNode) -> Vec<(&str, &SqlValue)> {
    let mut out = Vec::new();
    walk_eq(key, &mut |c, p| out.push((c, &p.value)));
    out
}

fn collect_key(key: &PredicateNode, out: &mut Vec<(String, DbParameter)>) {
    walk_eq(key, &mut |c, p| out.push((c.to_string(), p.clone())));
}

fn walk_eq<'a>(node: &'a PredicateNode, f: &mut impl FnMut(&'a str, &'a DbParameter)) {
    match node {
        PredicateNode::Comparison {
            column,
            op: ComparisonOp::Eq,
            param,
        } => f(column, param),
        PredicateNode::Logical { children, .. } => {
            for c in children {
                walk_eq(c, f);
            }
        }
        _ => {}
    }
}
