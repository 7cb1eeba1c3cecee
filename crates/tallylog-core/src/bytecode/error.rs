//! Compiler error types

use std::fmt;

use crate::lexer::{Location, Span};

use super::compiler::Type;

/// A compilation error
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub span: Span,
    /// Name of the program being compiled
    pub program: String,
    /// Present when the compiler was given the program source
    pub location: Option<Location>,
    /// Optional hint for fixing the error
    pub hint: Option<String>,
}

impl CompileError {
    #[must_use]
    pub fn new(kind: CompileErrorKind, span: Span) -> Self {
        Self {
            kind,
            span,
            program: String::new(),
            location: None,
            hint: None,
        }
    }

    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(location) => write!(f, "{}:{location}: {}", self.program, self.kind)?,
            None => write!(f, "{}: {}: {}", self.program, self.span, self.kind)?,
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {hint}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}

/// The kind of compilation error
#[derive(Debug, Clone, PartialEq)]
pub enum CompileErrorKind {
    InvalidPattern { pattern: String, message: String },

    UndeclaredMetric(String),

    /// Same name declared again with a different kind or keys
    ConflictingDeclaration(String),

    LabelArity {
        metric: String,
        expected: usize,
        got: usize,
    },

    /// `$N` or `$name` with no enclosing pattern defining that group
    UndefinedCapture(String),

    TypeMismatch {
        expected: &'static str,
        found: Type,
    },

    UnknownFunction(String),

    WrongArgumentCount {
        function: String,
        expected: usize,
        got: usize,
    },
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileErrorKind::InvalidPattern { pattern, message } => {
                write!(f, "invalid pattern /{pattern}/: {message}")
            }
            CompileErrorKind::UndeclaredMetric(name) => {
                write!(f, "metric '{name}' is not declared")
            }
            CompileErrorKind::ConflictingDeclaration(name) => {
                write!(f, "metric '{name}' is already declared with a different kind or keys")
            }
            CompileErrorKind::LabelArity {
                metric,
                expected,
                got,
            } => {
                write!(f, "metric '{metric}' takes {expected} labels, got {got}")
            }
            CompileErrorKind::UndefinedCapture(name) => {
                write!(f, "capture group {name} is not defined by an enclosing pattern")
            }
            CompileErrorKind::TypeMismatch { expected, found } => {
                write!(f, "expected {expected}, found {found}")
            }
            CompileErrorKind::UnknownFunction(name) => {
                write!(f, "unknown function '{name}'")
            }
            CompileErrorKind::WrongArgumentCount {
                function,
                expected,
                got,
            } => {
                write!(f, "'{function}' takes {expected} arguments, got {got}")
            }
        }
    }
}

/// Result type for compilation operations
pub type CompileResult<T> = Result<T, CompileError>;
