//! Expression AST nodes

use crate::lexer::Span;

use super::Ident;

/// An expression with source location
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    #[must_use]
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// `/pattern/`, stored without the delimiting slashes
    Regex(String),
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    CapRef(CapRef),

    /// Builtin call such as `strptime($1, "%Y-%m-%d")`
    Call { name: Ident, args: Vec<Expr> },

    /// Relational comparison
    Compare {
        left: Box<Expr>,
        op: RelOp,
        right: Box<Expr>,
    },

    /// `&&` / `||`
    Logical {
        left: Box<Expr>,
        op: LogicalOp,
        right: Box<Expr>,
    },

    Not(Box<Expr>),
}

/// A capture group reference: `$1` or `$name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapRef {
    Index(usize),
    Named(String),
}

impl std::fmt::Display for CapRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapRef::Index(i) => write!(f, "${i}"),
            CapRef::Named(name) => write!(f, "${name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
}

impl RelOp {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            RelOp::Lt => "<",
            RelOp::Le => "<=",
            RelOp::Eq => "==",
            RelOp::Ne => "!=",
            RelOp::Ge => ">=",
            RelOp::Gt => ">",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}
