//! Abstract syntax tree for tallylog programs
//!
//! Every node carries a [`Span`] so the code generator can report errors at
//! the offending source position.

mod expr;
mod stmt;

pub use expr::*;
pub use stmt::*;

use std::time::Duration;

pub use crate::lexer::Span;
use crate::metrics::Kind;

/// An identifier with its source location
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    #[must_use]
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
        }
    }
}

/// A complete program: metric declarations plus top-level statements
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub decls: Vec<MetricDecl>,
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

/// `counter name by key, key expire 5m`
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDecl {
    pub kind: Kind,
    pub name: Ident,
    pub keys: Vec<Ident>,
    pub expiry: Option<Duration>,
    pub span: Span,
}

/// A braced list of statements
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

impl Block {
    #[must_use]
    pub fn new(stmts: Vec<Stmt>, span: Span) -> Self {
        Self { stmts, span }
    }
}
