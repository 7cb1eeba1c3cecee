//! Instruction set for the tallylog virtual machine

use std::fmt;
use std::str::FromStr;

/// Bytecode operation codes
///
/// Every instruction carries a single integer operand; opcodes that take no
/// argument are emitted with operand 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    // ===== Matching and control flow =====
    /// Run a pattern against the line, set the matched flag and refresh
    /// the pattern's capture registers.
    /// Operand: pattern index
    Match,

    /// Jump if the matched flag is clear
    /// Operand: absolute instruction index
    Jnm,

    /// Jump if the matched flag is set
    /// Operand: absolute instruction index
    Jm,

    /// Unconditional jump
    /// Operand: absolute instruction index
    Jmp,

    /// Set the matched flag
    /// Operand: 0 or 1
    SetMatched,

    /// Pop b, pop a, set the matched flag to `ordering(a, b) == operand`
    /// Operand: -1, 0 or 1
    Cmp,

    // ===== Stack =====
    /// Push an integer literal
    /// Operand: the integer
    Push,

    /// Discard the top of stack
    Pop,

    /// Pop a pattern index, push that pattern's capture group as a string
    /// Operand: group index
    Capref,

    /// Push a string constant
    /// Operand: string table index
    Str,

    // ===== Metrics =====
    /// Resolve a declared metric through the store and push its handle
    /// Operand: metric table index
    Mload,

    /// Pop labels and a metric handle, push the datum handle for that
    /// label tuple
    /// Operand: label count
    Dload,

    /// Increment the datum below the top of stack
    /// Operand: 0 adds one, 1 pops the delta first
    Inc,

    /// Pop a value, pop a datum handle, store the value
    Set,

    // ===== Conversions =====
    /// String to integer
    S2i,

    /// String to float
    S2f,

    /// Integer to string
    I2s,

    /// Float to string
    F2s,

    // ===== Builtins =====
    /// Pop a format, pop a value, parse it as a time, use it as the write
    /// timestamp for the rest of the run and push it
    /// Operand: argument count (always 2)
    Strptime,
}

impl OpCode {
    #[must_use]
    pub const fn all() -> &'static [OpCode] {
        &[
            OpCode::Match,
            OpCode::Jnm,
            OpCode::Jm,
            OpCode::Jmp,
            OpCode::SetMatched,
            OpCode::Cmp,
            OpCode::Push,
            OpCode::Pop,
            OpCode::Capref,
            OpCode::Str,
            OpCode::Mload,
            OpCode::Dload,
            OpCode::Inc,
            OpCode::Set,
            OpCode::S2i,
            OpCode::S2f,
            OpCode::I2s,
            OpCode::F2s,
            OpCode::Strptime,
        ]
    }

    /// Mnemonic used by the disassembler
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            OpCode::Match => "match",
            OpCode::Jnm => "jnm",
            OpCode::Jm => "jm",
            OpCode::Jmp => "jmp",
            OpCode::SetMatched => "setmatched",
            OpCode::Cmp => "cmp",
            OpCode::Push => "push",
            OpCode::Pop => "pop",
            OpCode::Capref => "capref",
            OpCode::Str => "str",
            OpCode::Mload => "mload",
            OpCode::Dload => "dload",
            OpCode::Inc => "inc",
            OpCode::Set => "set",
            OpCode::S2i => "s2i",
            OpCode::S2f => "s2f",
            OpCode::I2s => "i2s",
            OpCode::F2s => "f2s",
            OpCode::Strptime => "strptime",
        }
    }

    /// Whether the operand is an instruction index
    #[must_use]
    pub const fn is_jump(self) -> bool {
        matches!(self, OpCode::Jnm | OpCode::Jm | OpCode::Jmp)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OpCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OpCode::all()
            .iter()
            .copied()
            .find(|op| op.name() == s)
            .ok_or_else(|| format!("unknown opcode {s:?}"))
    }
}

/// One instruction: opcode plus immediate operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub opcode: OpCode,
    pub operand: i64,
}

impl Instruction {
    #[must_use]
    pub const fn new(opcode: OpCode, operand: i64) -> Self {
        Self { opcode, operand }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.opcode, self.operand)
    }
}

impl FromStr for Instruction {
    type Err = String;

    /// Parse the `"opcode operand"` form produced by `Display`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let opcode = parts
            .next()
            .ok_or_else(|| "empty instruction".to_string())?
            .parse::<OpCode>()?;
        let operand = match parts.next() {
            Some(text) => text
                .parse::<i64>()
                .map_err(|_| format!("invalid operand {text:?}"))?,
            None => 0,
        };
        if let Some(extra) = parts.next() {
            return Err(format!("unexpected {extra:?} after operand"));
        }
        Ok(Instruction::new(opcode, operand))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for op in OpCode::all() {
            assert_eq!(op.name().parse::<OpCode>(), Ok(*op));
        }
        assert!("nop".parse::<OpCode>().is_err());
    }

    #[test]
    fn instruction_text_form() {
        let instr: Instruction = "cmp -1".parse().unwrap();
        assert_eq!(instr, Instruction::new(OpCode::Cmp, -1));
        assert_eq!(instr.to_string(), "cmp -1");
        assert_eq!("pop".parse::<Instruction>(), Ok(Instruction::new(OpCode::Pop, 0)));
        assert!("jmp 1 2".parse::<Instruction>().is_err());
    }
}
