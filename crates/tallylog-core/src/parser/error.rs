//! Parser error types

use thiserror::Error;

use crate::lexer::{LexError, Location, Span, TokenKind};

/// A parser error with location information
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub span: Span,
    /// Filled in by the parser, which owns the source line index
    pub location: Option<Location>,
}

impl ParseError {
    #[must_use]
    pub fn new(kind: ParseErrorKind, span: Span) -> Self {
        Self {
            kind,
            span,
            location: None,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.location {
            Some(location) => write!(f, "{location}: {}", self.kind),
            None => write!(f, "{}: {}", self.span, self.kind),
        }
    }
}

impl std::error::Error for ParseError {}

/// The kind of parse error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    #[error("unexpected {found}, expected {expected}")]
    UnexpectedToken {
        found: TokenKind,
        expected: ExpectedToken,
    },

    #[error("expected expression, found {0}")]
    ExpectedExpression(TokenKind),

    #[error("invalid number literal: {0}")]
    InvalidNumber(String),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("invalid escape sequence: \\{0}")]
    InvalidEscape(char),

    #[error(transparent)]
    Lex(#[from] LexError),
}

/// What token was expected
#[derive(Debug, Clone, PartialEq)]
pub enum ExpectedToken {
    Token(TokenKind),
    Description(&'static str),
}

impl std::fmt::Display for ExpectedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpectedToken::Token(kind) => write!(f, "{kind}"),
            ExpectedToken::Description(desc) => f.write_str(desc),
        }
    }
}
