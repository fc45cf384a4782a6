//! `$orderby`, `$first`, and `$after`: keyset pagination over a stable ordering.
//!
//! A continuation token is URL-safe base64 (no padding) of a JSON array
//! `[{"column": .., "value": .., "direction": "asc"|"desc"}, ..]` holding the last
//! row's ordering values, primary-key tie-breakers included. The next page is the
//! rows strictly after that tuple in the ordering.

use crate::config::RestConfig;
use crate::error::EngineError;
use crate::executor::Row;
use crate::filter::{ComparisonOp, LogicalOp, PredicateNode};
use crate::metadata::EntityDescriptor;
use crate::sql::{coerce_json, coerce_text, DbParameter, OrderColumn, SqlValue};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Direction {
    Asc,
    Desc,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Cursor {
    column: String,
    value: Value,
    direction: Direction,
}

fn direction_of(o: &OrderColumn) -> Direction {
    if o.descending {
        Direction::Desc
    } else {
        Direction::Asc
    }
}

/// Parse `col [asc|desc], ...`.
pub fn parse_order_by(entity: &EntityDescriptor, text: &str) -> Result<Vec<OrderColumn>, EngineError> {
    let mut out: Vec<OrderColumn> = Vec::new();
    for item in text.split(',') {
        let words: Vec<&str> = item.split_whitespace().collect();
        let (column, descending) = match words.as_slice() {
            [c] => (*c, false),
            [c, d] if d.eq_ignore_ascii_case("asc") => (*c, false),
            [c, d] if d.eq_ignore_ascii_case("desc") => (*c, true),
            _ => return Err(EngineError::BadRequest(format!("invalid $orderby item: '{}'", item.trim()))),
        };
        if !entity.has_column(column) {
            return Err(EngineError::InvalidField(format!("{} is not a field of {}", column, entity.name)));
        }
        if out.iter().any(|o| o.column == column) {
            return Err(EngineError::BadRequest(format!("$orderby names '{}' more than once", column)));
        }
        out.push(OrderColumn {
            column: column.to_string(),
            descending,
        });
    }
    Ok(out)
}

/// Requested ordering followed by any key columns not already in it, ascending.
pub fn stable_ordering(entity: &EntityDescriptor, mut requested: Vec<OrderColumn>) -> Vec<OrderColumn> {
    for k in &entity.primary_key {
        if !requested.iter().any(|o| &o.column == k) {
            requested.push(OrderColumn::asc(k.clone()));
        }
    }
    requested
}

/// Page size from `$first`: absent is the default, `-1` is the maximum, larger values are capped.
pub fn page_size(first: Option<i64>, rest: &RestConfig) -> Result<u32, EngineError> {
    match first {
        None => Ok(rest.default_page_size),
        Some(-1) => Ok(rest.max_page_size),
        Some(n) if n > 0 => Ok(n.min(rest.max_page_size as i64) as u32),
        Some(n) => Err(EngineError::BadRequest(format!(
            "$first must be a positive integer or -1, got {}",
            n
        ))),
    }
}

/// Token for the page after `last`.
pub fn encode_token(order: &[OrderColumn], last: &Row) -> String {
    let cursors: Vec<Value> = order
        .iter()
        .map(|o| {
            serde_json::json!({
                "column": o.column,
                "value": last.get(&o.column).cloned().unwrap_or(Value::Null),
                "direction": direction_of(o),
            })
        })
        .collect();
    URL_SAFE_NO_PAD.encode(Value::Array(cursors).to_string())
}

/// Decode `token` and build the predicate selecting rows after it. `None` means no row
/// can follow.
pub fn continuation_predicate(
    entity: &EntityDescriptor,
    order: &[OrderColumn],
    token: &str,
) -> Result<Option<PredicateNode>, EngineError> {
    let invalid = || EngineError::BadRequest(format!("$after is not a valid continuation token: {}", token));
    let bytes = URL_SAFE_NO_PAD.decode(token.as_bytes()).map_err(|_| invalid())?;
    let cursors: Vec<Cursor> = serde_json::from_slice(&bytes).map_err(|_| invalid())?;
    let matches_order = cursors.len() == order.len()
        && cursors
            .iter()
            .zip(order)
            .all(|(c, o)| c.column == o.column && c.direction == direction_of(o));
    if !matches_order {
        return Err(EngineError::BadRequest(
            "$after token does not match the requested $orderby".into(),
        ));
    }

    let mut values: Vec<DbParameter> = Vec::with_capacity(cursors.len());
    let mut nullable: Vec<bool> = Vec::with_capacity(cursors.len());
    for c in &cursors {
        let column = entity.column(&c.column).ok_or_else(invalid)?;
        let value = coerce_json(&c.value, column.column_type)
            .or_else(|| c.value.as_str().and_then(|s| coerce_text(s, column.column_type)))
            .ok_or_else(invalid)?;
        values.push(DbParameter::new(value, column.storage_type.clone()));
        nullable.push(column.nullable);
    }

    // (c1 after v1) OR (c1 = v1 AND c2 after v2) OR ...
    let mut branches = Vec::with_capacity(order.len());
    for (i, o) in order.iter().enumerate() {
        let Some(after) = strictly_after(o, &values[i], nullable[i]) else {
            continue;
        };
        let mut conj: Vec<PredicateNode> = order[..i]
            .iter()
            .zip(&values[..i])
            .map(|(p, v)| PredicateNode::compare(p.column.clone(), ComparisonOp::Eq, v.clone()))
            .collect();
        conj.push(after);
        if let Some(node) = PredicateNode::all(conj) {
            branches.push(node);
        }
    }
    Ok(match branches.len() {
        0 => None,
        1 => branches.pop(),
        _ => Some(PredicateNode::Logical {
            op: LogicalOp::Or,
            children: branches,
        }),
    })
}

/// Rows after `v` in column `o`, with NULLs sorting last ascending and first descending.
fn strictly_after(o: &OrderColumn, v: &DbParameter, nullable: bool) -> Option<PredicateNode> {
    let null = DbParameter::new(SqlValue::Null, v.storage_type.clone());
    match (o.descending, v.value.is_null()) {
        (false, true) => None,
        (false, false) => {
            let gt = PredicateNode::compare(o.column.clone(), ComparisonOp::Gt, v.clone());
            if !nullable {
                return Some(gt);
            }
            Some(PredicateNode::Logical {
                op: LogicalOp::Or,
                children: vec![gt, PredicateNode::compare(o.column.clone(), ComparisonOp::Eq, null)],
            })
        }
        (true, true) => Some(PredicateNode::compare(o.column.clone(), ComparisonOp::Ne, null)),
        (true, false) => Some(PredicateNode::compare(o.column.clone(), ComparisonOp::Lt, v.clone())),
    }
}
