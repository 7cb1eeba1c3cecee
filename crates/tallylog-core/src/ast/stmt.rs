//! Statement AST nodes

use crate::lexer::Span;

use super::{Block, Expr, Ident};

/// A statement with source location
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    #[must_use]
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `cond { ... } else { ... }`
    Cond {
        cond: Expr,
        body: Block,
        else_body: Option<Block>,
    },

    /// `target++` (`by` is `None`) or `target += by`
    Inc { target: MetricRef, by: Option<Expr> },

    /// `target = value`
    Assign { target: MetricRef, value: Expr },

    /// An expression evaluated for its side effects, e.g. `strptime(...)`
    Expr(Expr),
}

/// A metric reference, optionally indexed by label values: `hits[$1, "GET"]`
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRef {
    pub name: Ident,
    pub labels: Vec<Expr>,
    pub span: Span,
}
