//! Compiled program representation

use std::time::Duration;

use regex::Regex;

use crate::metrics::{Kind, Metric};

use super::opcode::{Instruction, OpCode};

/// An interned pattern
#[derive(Debug, Clone)]
pub struct Pattern {
    pub source: String,
    pub regex: Regex,
}

/// A metric declared by a program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDecl {
    pub name: String,
    pub kind: Kind,
    pub keys: Vec<String>,
    pub expiry: Option<Duration>,
}

impl MetricDecl {
    /// A fresh, empty store metric for this declaration
    #[must_use]
    pub fn instantiate(&self, program: &str) -> Metric {
        Metric::new(&self.name, program, self.kind, self.keys.clone()).with_expiry(self.expiry)
    }
}

/// A compiled program. Immutable once the compiler hands it out.
#[derive(Debug, Clone)]
pub struct Program {
    name: String,
    instructions: Vec<Instruction>,
    patterns: Vec<Pattern>,
    strings: Vec<String>,
    metrics: Vec<MetricDecl>,
}

impl Program {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: Vec::new(),
            patterns: Vec::new(),
            strings: Vec::new(),
            metrics: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    #[must_use]
    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    #[must_use]
    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    #[must_use]
    pub fn metrics(&self) -> &[MetricDecl] {
        &self.metrics
    }

    /// A fresh, empty store metric for declaration `index`
    #[must_use]
    pub fn instantiate_metric(&self, index: usize) -> Option<Metric> {
        self.metrics.get(index).map(|decl| decl.instantiate(&self.name))
    }

    // ===== Builders used by the compiler =====

    pub(crate) fn emit(&mut self, opcode: OpCode, operand: i64) -> usize {
        self.instructions.push(Instruction::new(opcode, operand));
        self.instructions.len() - 1
    }

    /// Emit a jump with a placeholder target, returning its patch site
    pub(crate) fn emit_jump(&mut self, opcode: OpCode) -> usize {
        self.emit(opcode, -1)
    }

    /// Point the jump at `site` to the next instruction to be emitted
    pub(crate) fn patch_jump(&mut self, site: usize) {
        let target = self.instructions.len() as i64;
        if let Some(instr) = self.instructions.get_mut(site) {
            instr.operand = target;
        }
    }

    pub(crate) fn add_string(&mut self, value: &str) -> usize {
        if let Some(i) = self.strings.iter().position(|s| s == value) {
            return i;
        }
        self.strings.push(value.to_string());
        self.strings.len() - 1
    }

    pub(crate) fn add_pattern(&mut self, source: &str) -> Result<usize, regex::Error> {
        if let Some(i) = self.patterns.iter().position(|p| p.source == source) {
            return Ok(i);
        }
        let regex = Regex::new(source)?;
        self.patterns.push(Pattern {
            source: source.to_string(),
            regex,
        });
        Ok(self.patterns.len() - 1)
    }

    pub(crate) fn add_metric(&mut self, decl: MetricDecl) -> usize {
        self.metrics.push(decl);
        self.metrics.len() - 1
    }
}
