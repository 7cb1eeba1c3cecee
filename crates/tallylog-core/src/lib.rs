//! tallylog core - turns log lines into metrics
//!
//! Programs written in the tallylog language pair regular expressions with
//! metric updates. This crate provides:
//! - Lexer and parser: program source to AST
//! - Bytecode: instruction set and the code generator
//! - VM: evaluates a program against one line
//! - Metrics: counters, gauges and friends in a concurrent store with expiry
//! - Runtime: loads programs and drives lines through them

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Lexer module - tokenization of program source
pub mod lexer;

/// Abstract Syntax Tree - parsed representation of a program
pub mod ast;

/// Parser module - converts tokens into AST
pub mod parser;

/// Bytecode module - instruction set and compiler
pub mod bytecode;

/// Virtual Machine module - bytecode execution
pub mod vm;

/// Metric model and store
pub mod metrics;

/// Program loading and line dispatch
pub mod runtime;

/// Configuration file
pub mod config;

/// Test utilities - helpers for testing programs
pub mod testutil;

/// Convenience re-export of parser
pub use parser::Parser;

/// Convenience re-export of bytecode compiler
pub use bytecode::{Compiler, Program};

/// Convenience re-export of VM
pub use vm::Vm;

/// Convenience re-export of the metric store
pub use metrics::{Kind, Metric, Store};

/// Convenience re-export of the runtime driver
pub use runtime::{LineOutcome, LoadError, Runtime};

/// Convenience re-export of configuration
pub use config::{Config, ConfigError};
