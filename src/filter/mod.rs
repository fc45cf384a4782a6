//! Filter expressions and the predicate tree they compile to.
//!
//! Parsing (`$filter` text, GraphQL filter objects, configured policies) yields a
//! [`FilterExpr`] that only knows field names. Compilation against an
//! [`EntityDescriptor`](crate::metadata::EntityDescriptor) checks fields, coerces
//! literals, and produces a [`PredicateNode`] whose leaves are bound parameters.

mod compile;
pub mod graphql;
pub mod lexer;
pub mod parser;
mod predicate;

pub use compile::{compile_filter, compile_primary_key};
pub use graphql::parse_graphql_filter;
pub use parser::{parse_filter, parse_policy};
pub use predicate::{ComparisonOp, LogicalOp, PredicateNode};

use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Literal {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Literal::Null => serde_json::Value::Null,
            Literal::Bool(b) => serde_json::Value::Bool(*b),
            Literal::Int(n) => serde_json::Value::Number((*n).into()),
            Literal::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Literal::Str(s) => serde_json::Value::String(s.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FilterValue {
    Literal(Literal),
    /// `@claims.name`; resolved per request.
    Claim(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum FilterExpr {
    Compare {
        field: String,
        op: ComparisonOp,
        value: FilterValue,
    },
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
}

impl FilterExpr {
    /// Every field name the expression touches.
    pub fn referenced_fields(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            FilterExpr::Compare { field, .. } => {
                out.insert(field.as_str());
            }
            FilterExpr::And(children) | FilterExpr::Or(children) => {
                for c in children {
                    c.collect_fields(out);
                }
            }
            FilterExpr::Not(inner) => inner.collect_fields(out),
        }
    }

    pub fn uses_claims(&self) -> bool {
        match self {
            FilterExpr::Compare { value, .. } => matches!(value, FilterValue::Claim(_)),
            FilterExpr::And(children) | FilterExpr::Or(children) => children.iter().any(FilterExpr::uses_claims),
            FilterExpr::Not(inner) => inner.uses_claims(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referenced_fields_are_collected_once() {
        let expr = parse_filter("a eq 1 and (b eq 2 or not a eq 3)").unwrap();
        assert_eq!(expr.referenced_fields().into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(!expr.uses_claims());
        assert!(parse_policy("owner eq @claims.sub").unwrap().uses_claims());
    }
}
