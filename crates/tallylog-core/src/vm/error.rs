//! Runtime errors for the tallylog virtual machine

use std::fmt;

use crate::bytecode::Instruction;
use crate::metrics::MetricError;

/// A runtime error that aborted one program's evaluation of one line
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    /// Name of the program being run
    pub program: String,
    /// Index of the failing instruction
    pub ip: usize,
    pub instruction: Option<Instruction>,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: at {:04}", self.program, self.ip)?;
        if let Some(instruction) = self.instruction {
            write!(f, " ({instruction})")?;
        }
        write!(f, ": {}", self.kind)
    }
}

impl std::error::Error for RuntimeError {}

/// The kind of runtime error
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeErrorKind {
    TypeError {
        expected: &'static str,
        got: &'static str,
        operation: &'static str,
    },

    /// A string could not be converted to a number
    Conversion { value: String, target: &'static str },

    /// `strptime` could not parse its input
    Timestamp {
        value: String,
        format: String,
        message: String,
    },

    /// A capture was read from a pattern that did not match this line
    CaptureUnset { pattern: usize },

    IndexOutOfBounds {
        table: &'static str,
        index: i64,
        length: usize,
    },

    StackUnderflow,

    StackOverflow,

    Metric(MetricError),
}

impl fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeErrorKind::TypeError {
                expected,
                got,
                operation,
            } => write!(f, "type error: {operation} expected {expected}, got {got}"),
            RuntimeErrorKind::Conversion { value, target } => {
                write!(f, "cannot convert {value:?} to {target}")
            }
            RuntimeErrorKind::Timestamp {
                value,
                format,
                message,
            } => write!(f, "cannot parse {value:?} with format {format:?}: {message}"),
            RuntimeErrorKind::CaptureUnset { pattern } => {
                write!(f, "captures of pattern {pattern} are unset: it did not match")
            }
            RuntimeErrorKind::IndexOutOfBounds {
                table,
                index,
                length,
            } => write!(f, "{table} index {index} out of bounds for length {length}"),
            RuntimeErrorKind::StackUnderflow => write!(f, "stack underflow"),
            RuntimeErrorKind::StackOverflow => write!(f, "stack overflow"),
            RuntimeErrorKind::Metric(err) => write!(f, "{err}"),
        }
    }
}

impl From<MetricError> for RuntimeErrorKind {
    fn from(err: MetricError) -> Self {
        RuntimeErrorKind::Metric(err)
    }
}

/// Result type for VM operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;
