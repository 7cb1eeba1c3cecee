//! Test utilities for tallylog
//!
//! Helpers shared by unit and integration tests: compiling a source to a
//! program or an instruction listing, feeding lines through a fresh store,
//! and reading datum values back out.

use std::sync::Arc;

use crate::bytecode::{Instruction, OpCode, Program};
use crate::metrics::{Number, Store};
use crate::runtime;
use crate::vm::Vm;

/// Result type for test helpers
pub type TestResult<T> = Result<T, String>;

/// Parse and compile a program named `test`
///
/// # Errors
/// Returns error if parsing or compilation fails
pub fn compile_program(source: &str) -> TestResult<Program> {
    runtime::compile("test", source).map_err(|e| e.to_string())
}

/// Compile and return only the `(opcode, operand)` listing
///
/// # Errors
/// Returns error if parsing or compilation fails
pub fn listing(source: &str) -> TestResult<Vec<Instruction>> {
    Ok(compile_program(source)?.instructions().to_vec())
}

/// Build an expected listing from `(opcode, operand)` pairs
pub fn instrs(pairs: &[(OpCode, i64)]) -> Vec<Instruction> {
    pairs
        .iter()
        .map(|&(opcode, operand)| Instruction::new(opcode, operand))
        .collect()
}

/// Compile `source`, register its metrics in a fresh store and run every
/// line through it, stopping at the first runtime error
///
/// # Errors
/// Returns error if compilation or any line's evaluation fails
pub fn run_lines(source: &str, lines: &[&str]) -> TestResult<Arc<Store>> {
    let program = compile_program(source)?;
    let store = Arc::new(Store::new());
    for decl in program.metrics() {
        store
            .add(decl.instantiate(program.name()))
            .map_err(|e| e.to_string())?;
    }
    for line in lines {
        Vm::execute(&program, line, &store).map_err(|e| e.to_string())?;
    }
    Ok(store)
}

/// Current value of metric `name` (from program `test`) at `labels`
///
/// # Errors
/// Returns error if the metric or label tuple does not exist
pub fn datum_value(store: &Store, name: &str, labels: &[&str]) -> TestResult<Number> {
    let metric = store
        .find_metric_or_nil(name, "test")
        .ok_or_else(|| format!("metric '{name}' not found"))?;
    let labels: Vec<String> = labels.iter().map(|l| (*l).to_string()).collect();
    metric
        .label_values()
        .into_iter()
        .find(|lv| lv.labels == labels)
        .map(|lv| lv.value.value())
        .ok_or_else(|| format!("no datum for {name}{labels:?}"))
}

/// Integer value of metric `name` at `labels`
///
/// # Errors
/// Returns error if the datum is missing or holds a float
pub fn datum_int(store: &Store, name: &str, labels: &[&str]) -> TestResult<i64> {
    match datum_value(store, name, labels)? {
        Number::Int(i) => Ok(i),
        other => Err(format!("expected integer, got {other}")),
    }
}
