//! Recursive descent parser for `$filter` and policy expressions.
//!
//! Grammar (closed):
//! ```text
//! expr    := or
//! or      := and ("or" and)*
//! and     := unary ("and" unary)*
//! unary   := "not" unary | "(" expr ")" | compare
//! compare := operand op operand        op ∈ eq ne gt lt ge le
//! operand := field | literal | @item.field | @claims.name
//! ```

use crate::error::EngineError;
use crate::filter::lexer::{tokenize, SpannedToken, Token};
use crate::filter::{ComparisonOp, FilterExpr, FilterValue, Literal};

const MAX_DEPTH: usize = 64;

/// Which references an expression may contain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// Caller-supplied `$filter`: bare field names only.
    Request,
    /// Configured row filter: `@item.` fields and `@claims.` values allowed.
    Policy,
}

enum Operand {
    Field(String),
    Value(FilterValue),
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<SpannedToken>,
    pos: usize,
    depth: usize,
    mode: Mode,
}

/// Parse a caller `$filter` expression.
pub fn parse_filter(source: &str) -> Result<FilterExpr, EngineError> {
    Parser::new(source, Mode::Request)?.parse()
}

/// Parse a configured row-filter policy expression.
pub fn parse_policy(source: &str) -> Result<FilterExpr, EngineError> {
    Parser::new(source, Mode::Policy)?.parse()
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, mode: Mode) -> Result<Self, EngineError> {
        let tokens = tokenize(source).map_err(|offset| {
            EngineError::BadRequest(format!("$filter: unrecognized input at offset {}", offset))
        })?;
        Ok(Parser {
            source,
            tokens,
            pos: 0,
            depth: 0,
            mode,
        })
    }

    fn parse(mut self) -> Result<FilterExpr, EngineError> {
        if self.tokens.is_empty() {
            return Err(EngineError::BadRequest("$filter: expression is empty".into()));
        }
        let expr = self.parse_or()?;
        if let Some(tok) = self.tokens.get(self.pos) {
            return Err(self.syntax_error(tok, "unexpected trailing input"));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<FilterExpr, EngineError> {
        let mut terms = vec![self.parse_and()?];
        while self.eat(&Token::Or) {
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            FilterExpr::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<FilterExpr, EngineError> {
        let mut terms = vec![self.parse_unary()?];
        while self.eat(&Token::And) {
            terms.push(self.parse_unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            FilterExpr::And(terms)
        })
    }

    fn parse_unary(&mut self) -> Result<FilterExpr, EngineError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(EngineError::BadRequest("$filter: expression is nested too deeply".into()));
        }
        let expr = if self.eat(&Token::Not) {
            FilterExpr::Not(Box::new(self.parse_unary()?))
        } else if self.eat(&Token::LParen) {
            let inner = self.parse_or()?;
            self.expect(&Token::RParen, "expected ')'")?;
            inner
        } else {
            self.parse_compare()?
        };
        self.depth -= 1;
        Ok(expr)
    }

    fn parse_compare(&mut self) -> Result<FilterExpr, EngineError> {
        let left = self.parse_operand()?;
        let op = self.parse_operator()?;
        let right = self.parse_operand()?;
        match (left, right) {
            (Operand::Field(field), Operand::Value(value)) => Ok(FilterExpr::Compare { field, op, value }),
            (Operand::Value(value), Operand::Field(field)) => Ok(FilterExpr::Compare {
                field,
                op: op.flipped(),
                value,
            }),
            (Operand::Field(_), Operand::Field(_)) => Err(EngineError::BadRequest(
                "$filter: comparing two fields is not supported".into(),
            )),
            (Operand::Value(_), Operand::Value(_)) => Err(EngineError::BadRequest(
                "$filter: a comparison must reference a field".into(),
            )),
        }
    }

    fn parse_operator(&mut self) -> Result<ComparisonOp, EngineError> {
        let Some(tok) = self.tokens.get(self.pos).cloned() else {
            return Err(EngineError::BadRequest("$filter: expected comparison operator".into()));
        };
        let op = match tok.token {
            Token::Eq => ComparisonOp::Eq,
            Token::Ne => ComparisonOp::Ne,
            Token::Gt => ComparisonOp::Gt,
            Token::Lt => ComparisonOp::Lt,
            Token::Ge => ComparisonOp::Ge,
            Token::Le => ComparisonOp::Le,
            Token::Ident(name) => return Err(EngineError::UnsupportedOperator(name)),
            _ => return Err(self.syntax_error(&tok, "expected comparison operator")),
        };
        self.pos += 1;
        Ok(op)
    }

    fn parse_operand(&mut self) -> Result<Operand, EngineError> {
        let Some(tok) = self.tokens.get(self.pos).cloned() else {
            return Err(EngineError::BadRequest("$filter: unexpected end of expression".into()));
        };
        let operand = match tok.token {
            Token::Ident(name) => Operand::Field(name),
            Token::ItemField(name) if self.mode == Mode::Policy => Operand::Field(name),
            Token::Claim(name) if self.mode == Mode::Policy => Operand::Value(FilterValue::Claim(name)),
            Token::Str(s) => Operand::Value(FilterValue::Literal(Literal::Str(s))),
            Token::Int(n) => Operand::Value(FilterValue::Literal(Literal::Int(n))),
            Token::Float(f) => Operand::Value(FilterValue::Literal(Literal::Float(f))),
            Token::True => Operand::Value(FilterValue::Literal(Literal::Bool(true))),
            Token::False => Operand::Value(FilterValue::Literal(Literal::Bool(false))),
            Token::Null => Operand::Value(FilterValue::Literal(Literal::Null)),
            _ => return Err(self.syntax_error(&tok, "expected field or literal")),
        };
        self.pos += 1;
        Ok(operand)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.tokens.get(self.pos).map(|t| &t.token) == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, message: &str) -> Result<(), EngineError> {
        if self.eat(expected) {
            return Ok(());
        }
        match self.tokens.get(self.pos).cloned() {
            Some(tok) => Err(self.syntax_error(&tok, message)),
            None => Err(EngineError::BadRequest(format!("$filter: {} at end of expression", message))),
        }
    }

    fn syntax_error(&self, tok: &SpannedToken, message: &str) -> EngineError {
        let text = self.source.get(tok.span.clone()).unwrap_or("");
        EngineError::BadRequest(format!("$filter: {} near '{}' at offset {}", message, text, tok.span.start))
    }
}
