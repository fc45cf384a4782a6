//! Lexer for `$filter` and policy expressions using logos.

use logos::Logos;
use std::ops::Range;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    // Comparison operators
    #[token("eq")]
    Eq,
    #[token("ne")]
    Ne,
    #[token("gt")]
    Gt,
    #[token("lt")]
    Lt,
    #[token("ge")]
    Ge,
    #[token("le")]
    Le,

    // Logical operators
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,

    // Literals
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,

    /// `@item.column` (policy expressions only).
    #[regex(r"@item\.[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice()["@item.".len()..].to_string())]
    ItemField(String),

    /// `@claims.name` (policy expressions only).
    #[regex(r"@claims\.[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice()["@claims.".len()..].to_string())]
    Claim(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Single-quoted; '' is an escaped quote.
    #[regex(r"'([^']|'')*'", |lex| {
        let s = lex.slice();
        s[1..s.len() - 1].replace("''", "'")
    })]
    Str(String),

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r"-?[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Range<usize>,
}

/// Tokenize the whole input; the error carries the byte offset of the bad input.
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, usize> {
    let mut lexer = Token::lexer(source);
    let mut out = Vec::new();
    while let Some(next) = lexer.next() {
        match next {
            Ok(token) => out.push(SpannedToken {
                token,
                span: lexer.span(),
            }),
            Err(()) => return Err(lexer.span().start),
        }
    }
    Ok(out)
}
