//! GraphQL-style filter objects: `{ "title": { "eq": "x" }, "or": [ ... ] }`.

use crate::error::EngineError;
use crate::filter::{ComparisonOp, FilterExpr, FilterValue, Literal};
use serde_json::Value;

/// Parse a filter object. `Ok(None)` means the object constrains nothing.
pub fn parse_graphql_filter(v: &Value) -> Result<Option<FilterExpr>, EngineError> {
    let Value::Object(map) = v else {
        return Err(EngineError::BadRequest("filter must be an object".into()));
    };
    let mut terms = Vec::new();
    for (key, value) in map {
        match key.as_str() {
            "and" | "or" => {
                let Value::Array(items) = value else {
                    return Err(EngineError::BadRequest(format!("filter '{}' must be an array", key)));
                };
                let mut children = Vec::new();
                for item in items {
                    if let Some(child) = parse_graphql_filter(item)? {
                        children.push(child);
                    }
                }
                match (key.as_str(), children.len()) {
                    (_, 0) => {}
                    (_, 1) => terms.extend(children),
                    ("and", _) => terms.push(FilterExpr::And(children)),
                    _ => terms.push(FilterExpr::Or(children)),
                }
            }
            "not" => {
                if let Some(child) = parse_graphql_filter(value)? {
                    terms.push(FilterExpr::Not(Box::new(child)));
                }
            }
            field => terms.extend(field_comparisons(field, value)?),
        }
    }
    Ok(match terms.len() {
        0 => None,
        1 => terms.pop(),
        _ => Some(FilterExpr::And(terms)),
    })
}

fn field_comparisons(field: &str, ops: &Value) -> Result<Vec<FilterExpr>, EngineError> {
    let Value::Object(ops) = ops else {
        return Err(EngineError::BadRequest(format!(
            "filter for field '{}' must be an object of operators",
            field
        )));
    };
    let mut out = Vec::with_capacity(ops.len());
    for (name, operand) in ops {
        let (op, value) = match name.as_str() {
            "eq" => (ComparisonOp::Eq, literal(field, operand)?),
            "neq" => (ComparisonOp::Ne, literal(field, operand)?),
            "gt" => (ComparisonOp::Gt, literal(field, operand)?),
            "gte" => (ComparisonOp::Ge, literal(field, operand)?),
            "lt" => (ComparisonOp::Lt, literal(field, operand)?),
            "lte" => (ComparisonOp::Le, literal(field, operand)?),
            "isNull" => match operand {
                Value::Bool(true) => (ComparisonOp::Eq, Literal::Null),
                Value::Bool(false) => (ComparisonOp::Ne, Literal::Null),
                _ => {
                    return Err(EngineError::BadRequest(format!(
                        "isNull on '{}' expects a boolean",
                        field
                    )))
                }
            },
            other => return Err(EngineError::UnsupportedOperator(other.to_string())),
        };
        out.push(FilterExpr::Compare {
            field: field.to_string(),
            op,
            value: FilterValue::Literal(value),
        });
    }
    Ok(out)
}

fn literal(field: &str, v: &Value) -> Result<Literal, EngineError> {
    Ok(match v {
        Value::Null => Literal::Null,
        Value::Bool(b) => Literal::Bool(*b),
        Value::String(s) => Literal::Str(s.clone()),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Literal::Int(i),
            None => Literal::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::Array(_) | Value::Object(_) => {
            return Err(EngineError::BadRequest(format!(
                "filter value for '{}' must be a scalar",
                field
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sibling_fields_are_anded() {
        let expr = parse_graphql_filter(&json!({ "a": { "eq": 1 }, "b": { "gte": 2 } }))
            .unwrap()
            .unwrap();
        let FilterExpr::And(terms) = expr else { panic!("expected And") };
        assert_eq!(terms.len(), 2);
    }

    #[test]
    fn or_and_is_null() {
        let expr = parse_graphql_filter(&json!({ "or": [ { "a": { "isNull": true } }, { "a": { "lt": 0 } } ] }))
            .unwrap()
            .unwrap();
        assert_eq!(
            expr,
            FilterExpr::Or(vec![
                FilterExpr::Compare {
                    field: "a".into(),
                    op: ComparisonOp::Eq,
                    value: FilterValue::Literal(Literal::Null),
                },
                FilterExpr::Compare {
                    field: "a".into(),
                    op: ComparisonOp::Lt,
                    value: FilterValue::Literal(Literal::Int(0)),
                },
            ])
        );
    }

    #[test]
    fn empty_object_constrains_nothing() {
        assert_eq!(parse_graphql_filter(&json!({})).unwrap(), None);
        assert_eq!(parse_graphql_filter(&json!({ "and": [ {} ] })).unwrap(), None);
    }

    #[test]
    fn string_operators_are_not_supported() {
        assert!(matches!(
            parse_graphql_filter(&json!({ "title": { "contains": "x" } })),
            Err(EngineError::UnsupportedOperator(op)) if op == "contains"
        ));
    }
}
