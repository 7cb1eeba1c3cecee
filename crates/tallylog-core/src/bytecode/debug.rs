//! Bytecode disassembler for debugging

use std::fmt::Write;

use super::opcode::OpCode;
use super::program::Program;

/// Render a program's tables and instructions as text
#[must_use]
pub fn disassemble(program: &Program) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} ==", program.name());

    for (i, decl) in program.metrics().iter().enumerate() {
        let _ = write!(out, "metric {i:>3}  {} {}", decl.kind, decl.name);
        if !decl.keys.is_empty() {
            let _ = write!(out, " by {}", decl.keys.join(", "));
        }
        if let Some(expiry) = decl.expiry {
            let _ = write!(out, " expire {expiry:?}");
        }
        out.push('\n');
    }
    for (i, pattern) in program.patterns().iter().enumerate() {
        let _ = writeln!(out, "pattern {i:>2}  /{}/", pattern.source);
    }
    for (i, s) in program.strings().iter().enumerate() {
        let _ = writeln!(out, "string {i:>3}  {s:?}");
    }

    for (offset, instr) in program.instructions().iter().enumerate() {
        let _ = write!(out, "{offset:04}  {:<10} {:>4}", instr.opcode.name(), instr.operand);
        if let Some(note) = annotate(program, instr.opcode, instr.operand) {
            let _ = write!(out, "  ; {note}");
        }
        out.push('\n');
    }
    out
}

fn annotate(program: &Program, opcode: OpCode, operand: i64) -> Option<String> {
    let index = usize::try_from(operand).ok()?;
    match opcode {
        OpCode::Match => program.patterns().get(index).map(|p| format!("/{}/", p.source)),
        OpCode::Str => program.strings().get(index).map(|s| format!("{s:?}")),
        OpCode::Mload => program.metrics().get(index).map(|m| m.name.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Compiler;
    use crate::parser::Parser;

    #[test]
    fn disassembly_lists_tables_and_code() {
        let source = "counter hits by code expire 1m\n/(\\d+)/ { hits[$1]++ }";
        let ast = Parser::parse_program(source).unwrap();
        let program = Compiler::new("web.tl").compile(&ast).unwrap();
        let text = disassemble(&program);
        assert!(text.starts_with("== web.tl ==\n"));
        assert!(text.contains("counter hits by code expire 60s"));
        assert!(text.contains("0000  match         0  ; /(\\d+)/"));
        assert!(text.contains("mload         0  ; hits"));
    }
}
