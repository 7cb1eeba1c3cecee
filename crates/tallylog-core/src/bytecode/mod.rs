//! Bytecode module for the tallylog virtual machine
//!
//! This module provides:
//! - `OpCode` and `Instruction`: the instruction set
//! - `Program`: a compiled program with its pattern, string and metric tables
//! - `Compiler`: AST to bytecode compilation
//! - `disassemble`: human-readable listings

mod compiler;
mod debug;
mod error;
mod opcode;
mod program;

pub use compiler::{Compiler, Type};
pub use debug::disassemble;
pub use error::{CompileError, CompileErrorKind, CompileResult};
pub use opcode::{Instruction, OpCode};
pub use program::{MetricDecl, Pattern, Program};
