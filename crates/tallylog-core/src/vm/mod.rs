//! Stack virtual machine
//!
//! A [`Vm`] evaluates one compiled program against one input line. It is
//! cheap to build and is thrown away after the run; only the [`Store`] it
//! writes to outlives it. Any number of VMs may run concurrently against the
//! same store.

mod error;
mod value;

pub use error::{RuntimeError, RuntimeErrorKind, RuntimeResult};
pub use value::{DatumHandle, Value};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::bytecode::{Instruction, OpCode, Program};
use crate::metrics::{Datum, Number, Store};

/// Maximum operand stack depth
const MAX_STACK: usize = 1024;

type StepResult<T> = Result<T, RuntimeErrorKind>;

/// Parse `value` with a strftime-style `format`.
///
/// Zoned date-times keep their offset; naive date-times are read as UTC and
/// bare dates as midnight UTC.
pub fn parse_timestamp(format: &str, value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    if let Ok(zoned) = DateTime::parse_from_str(value, format) {
        return Ok(zoned.with_timezone(&Utc));
    }
    match NaiveDateTime::parse_from_str(value, format) {
        Ok(naive) => Ok(Utc.from_utc_datetime(&naive)),
        Err(err) => NaiveDate::parse_from_str(value, format)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| Utc.from_utc_datetime(&naive))
            .ok_or(err),
    }
}

/// One evaluation of a program against a line
pub struct Vm<'a> {
    program: &'a Program,
    store: &'a Store,
    stack: Vec<Value>,
    /// Capture groups per pattern; `None` until the pattern matches this line
    captures: Vec<Option<Vec<String>>>,
    matched: bool,
    any_match: bool,
    ip: usize,
    /// Write timestamp for every datum update in this run
    timestamp: DateTime<Utc>,
}

impl<'a> Vm<'a> {
    #[must_use]
    pub fn new(program: &'a Program, store: &'a Store) -> Self {
        Self {
            program,
            store,
            stack: Vec::with_capacity(16),
            captures: vec![None; program.patterns().len()],
            matched: false,
            any_match: false,
            ip: 0,
            timestamp: Utc::now(),
        }
    }

    /// Override the initial write timestamp
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Run `program` over `line` with a fresh VM
    pub fn execute(program: &Program, line: &str, store: &Store) -> RuntimeResult<bool> {
        Vm::new(program, store).run(line)
    }

    /// Run to completion. Returns whether any pattern matched the line.
    pub fn run(mut self, line: &str) -> RuntimeResult<bool> {
        let program = self.program;
        while let Some(&instruction) = program.instructions().get(self.ip) {
            let at = self.ip;
            self.ip += 1;
            if let Err(kind) = self.step(instruction, line) {
                return Err(RuntimeError {
                    kind,
                    program: program.name().to_string(),
                    ip: at,
                    instruction: Some(instruction),
                });
            }
        }
        Ok(self.any_match)
    }

    fn step(&mut self, instruction: Instruction, line: &str) -> StepResult<()> {
        let operand = instruction.operand;
        match instruction.opcode {
            OpCode::Match => {
                let index = self.index(operand, self.program.patterns().len(), "pattern")?;
                let regex = &self.program.patterns()[index].regex;
                let captures = regex.captures(line).map(|caps| {
                    caps.iter()
                        .map(|group| group.map_or_else(String::new, |m| m.as_str().to_string()))
                        .collect()
                });
                self.matched = captures.is_some();
                self.any_match |= self.matched;
                self.captures[index] = captures;
            }
            OpCode::Jnm => {
                if !self.matched {
                    self.jump(operand)?;
                }
            }
            OpCode::Jm => {
                if self.matched {
                    self.jump(operand)?;
                }
            }
            OpCode::Jmp => self.jump(operand)?,
            OpCode::SetMatched => self.matched = operand != 0,
            OpCode::Cmp => {
                let b = self.pop()?;
                let a = self.pop()?;
                let ordering = a.compare(&b).ok_or(RuntimeErrorKind::TypeError {
                    expected: a.type_name(),
                    got: b.type_name(),
                    operation: "cmp",
                })?;
                self.matched = ordering as i64 == operand;
            }
            OpCode::Push => self.push(Value::Int(operand))?,
            OpCode::Pop => {
                self.pop()?;
            }
            OpCode::Capref => {
                let pattern = match self.pop()? {
                    Value::Int(i) => self.index(i, self.captures.len(), "pattern")?,
                    other => return Err(type_error("pattern index", &other, "capref")),
                };
                let groups = self.captures[pattern]
                    .as_ref()
                    .ok_or(RuntimeErrorKind::CaptureUnset { pattern })?;
                let group = self.index(operand, groups.len(), "capture group")?;
                let value = groups[group].clone();
                self.push(Value::Str(value))?;
            }
            OpCode::Str => {
                let index = self.index(operand, self.program.strings().len(), "string")?;
                self.push(Value::Str(self.program.strings()[index].clone()))?;
            }
            OpCode::Mload => {
                let index = self.index(operand, self.program.metrics().len(), "metric")?;
                let decl = &self.program.metrics()[index];
                let program = self.program.name();
                let metric = self
                    .store
                    .find_or_insert_with(&decl.name, program, || decl.instantiate(program));
                self.push(Value::Metric(metric))?;
            }
            OpCode::Dload => {
                let count = usize::try_from(operand).map_err(|_| RuntimeErrorKind::IndexOutOfBounds {
                    table: "label count",
                    index: operand,
                    length: self.stack.len(),
                })?;
                let start = self
                    .stack
                    .len()
                    .checked_sub(count)
                    .ok_or(RuntimeErrorKind::StackUnderflow)?;
                let labels = self
                    .stack
                    .split_off(start)
                    .into_iter()
                    .map(|v| match v {
                        Value::Str(s) => Ok(s),
                        other => Err(type_error("string label", &other, "dload")),
                    })
                    .collect::<StepResult<Vec<String>>>()?;
                let metric = match self.pop()? {
                    Value::Metric(metric) => metric,
                    other => return Err(type_error("metric", &other, "dload")),
                };
                // The tuple is created by the write that follows, so a line
                // aborted before it leaves nothing behind.
                metric.check_arity(&labels)?;
                self.push(Value::Datum(DatumHandle { metric, labels }))?;
            }
            OpCode::Inc => {
                let delta = if operand == 0 {
                    Number::Int(1)
                } else {
                    self.pop_number("inc")?
                };
                let timestamp = self.timestamp;
                self.update_datum("inc", |d| d.increment_by(delta, timestamp))?;
            }
            OpCode::Set => {
                let value = self.pop_number("set")?;
                let timestamp = self.timestamp;
                self.update_datum("set", |d| d.set(value, timestamp))?;
            }
            OpCode::S2i => {
                let s = self.pop_str("s2i")?;
                let value = s.trim().parse::<i64>().map_err(|_| RuntimeErrorKind::Conversion {
                    value: s,
                    target: "integer",
                })?;
                self.push(Value::Int(value))?;
            }
            OpCode::S2f => {
                let s = self.pop_str("s2f")?;
                let value = s.trim().parse::<f64>().map_err(|_| RuntimeErrorKind::Conversion {
                    value: s,
                    target: "float",
                })?;
                self.push(Value::Float(value))?;
            }
            OpCode::I2s => match self.pop()? {
                Value::Int(i) => self.push(Value::Str(i.to_string()))?,
                other => return Err(type_error("integer", &other, "i2s")),
            },
            OpCode::F2s => match self.pop()? {
                Value::Float(f) => self.push(Value::Str(f.to_string()))?,
                other => return Err(type_error("float", &other, "f2s")),
            },
            OpCode::Strptime => {
                let format = self.pop_str("strptime")?;
                let value = self.pop_str("strptime")?;
                let time = parse_timestamp(&format, &value).map_err(|e| RuntimeErrorKind::Timestamp {
                    value,
                    format,
                    message: e.to_string(),
                })?;
                self.timestamp = time;
                self.push(Value::Time(time))?;
            }
        }
        Ok(())
    }

    // ===== Stack operations =====

    fn push(&mut self, value: Value) -> StepResult<()> {
        if self.stack.len() >= MAX_STACK {
            return Err(RuntimeErrorKind::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> StepResult<Value> {
        self.stack.pop().ok_or(RuntimeErrorKind::StackUnderflow)
    }

    fn pop_str(&mut self, operation: &'static str) -> StepResult<String> {
        match self.pop()? {
            Value::Str(s) => Ok(s),
            other => Err(type_error("string", &other, operation)),
        }
    }

    fn pop_number(&mut self, operation: &'static str) -> StepResult<Number> {
        let value = self.pop()?;
        value
            .as_number()
            .ok_or_else(|| type_error("number", &value, operation))
    }

    /// Pop a metric or datum handle and apply `f` to its datum
    fn update_datum(&mut self, operation: &'static str, f: impl FnOnce(&Datum)) -> StepResult<()> {
        match self.pop()? {
            Value::Metric(metric) => metric.update(&[], f)?,
            Value::Datum(handle) => handle.metric.update(&handle.labels, f)?,
            other => return Err(type_error("metric or datum", &other, operation)),
        }
        Ok(())
    }

    // ===== Operands =====

    fn index(&self, operand: i64, length: usize, table: &'static str) -> StepResult<usize> {
        usize::try_from(operand)
            .ok()
            .filter(|&i| i < length)
            .ok_or(RuntimeErrorKind::IndexOutOfBounds {
                table,
                index: operand,
                length,
            })
    }

    fn jump(&mut self, target: i64) -> StepResult<()> {
        // Jumping to one past the last instruction ends the run.
        let length = self.program.instructions().len();
        self.ip = self.index(target, length + 1, "jump target")?;
        Ok(())
    }
}

fn type_error(expected: &'static str, got: &Value, operation: &'static str) -> RuntimeErrorKind {
    RuntimeErrorKind::TypeError {
        expected,
        got: got.type_name(),
        operation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Compiler;
    use crate::metrics::Kind;
    use crate::parser::Parser;
    use chrono::Datelike;

    fn compile(source: &str) -> Program {
        let ast = Parser::parse_program(source).unwrap();
        Compiler::new("test.tl").compile(&ast).unwrap()
    }

    fn value(store: &Store, name: &str, labels: &[&str]) -> Option<Number> {
        let labels: Vec<String> = labels.iter().map(ToString::to_string).collect();
        let metric = store.find_metric_or_nil(name, "test.tl")?;
        metric
            .label_values()
            .into_iter()
            .find(|lv| lv.labels == labels)
            .map(|lv| lv.value.value())
    }

    #[test]
    fn counts_matching_lines() {
        let program = compile("counter lines\n/foo/ { lines++ }");
        let store = Store::new();
        assert!(Vm::execute(&program, "a foo b", &store).unwrap());
        assert!(!Vm::execute(&program, "bar", &store).unwrap());
        assert!(Vm::execute(&program, "foo", &store).unwrap());
        assert_eq!(value(&store, "lines", &[]), Some(Number::Int(2)));
    }

    #[test]
    fn labels_from_captures() {
        let program = compile("counter hits by method, code\n/(\\w+) \\S+ (\\d+)/ { hits[$1, $2]++ }");
        let store = Store::new();
        for line in ["GET /a 200", "GET /b 200", "POST /c 500"] {
            Vm::execute(&program, line, &store).unwrap();
        }
        assert_eq!(value(&store, "hits", &["GET", "200"]), Some(Number::Int(2)));
        assert_eq!(value(&store, "hits", &["POST", "500"]), Some(Number::Int(1)));
        let metric = store.find_metric_or_nil("hits", "test.tl").unwrap();
        assert_eq!(metric.kind(), Kind::Counter);
    }

    #[test]
    fn add_and_set_with_conversions() {
        let program = compile(
            "counter bytes\ngauge size\ngauge ratio\n/size=(\\d+) ratio=(\\S+)/ {\n bytes += $1\n size = $1\n ratio = float($2)\n}",
        );
        let store = Store::new();
        Vm::execute(&program, "size=10 ratio=0.5", &store).unwrap();
        Vm::execute(&program, "size=32 ratio=0.25", &store).unwrap();
        assert_eq!(value(&store, "bytes", &[]), Some(Number::Int(42)));
        assert_eq!(value(&store, "size", &[]), Some(Number::Float(32.0)));
        assert_eq!(value(&store, "ratio", &[]), Some(Number::Float(0.25)));
    }

    #[test]
    fn comparisons_on_captures() {
        let program = compile("counter slow\n/took (\\d+)ms/ { $1 > 100 { slow++ } }");
        let store = Store::new();
        for line in ["took 50ms", "took 150ms", "took 101ms", "took 100ms"] {
            Vm::execute(&program, line, &store).unwrap();
        }
        assert_eq!(value(&store, "slow", &[]), Some(Number::Int(2)));
    }

    #[test]
    fn else_and_logical_operators() {
        let program = compile(
            "counter both\ncounter other\n/a/ && !/b/ { both++ } else { other++ }",
        );
        let store = Store::new();
        for line in ["a", "ab", "b", "xa"] {
            Vm::execute(&program, line, &store).unwrap();
        }
        assert_eq!(value(&store, "both", &[]), Some(Number::Int(2)));
        assert_eq!(value(&store, "other", &[]), Some(Number::Int(2)));
    }

    #[test]
    fn or_short_circuits() {
        let program = compile("counter n\n/x/ || /y/ { n++ }");
        let store = Store::new();
        for line in ["x", "y", "xy", "z"] {
            Vm::execute(&program, line, &store).unwrap();
        }
        assert_eq!(value(&store, "n", &[]), Some(Number::Int(3)));
    }

    #[test]
    fn strptime_sets_write_timestamp() {
        let program =
            compile("counter events\n/^(\\S+) / { strptime($1, \"%Y-%m-%dT%H:%M:%S\")\n events++ }");
        let store = Store::new();
        Vm::execute(&program, "2001-02-03T04:05:06 hello", &store).unwrap();
        let metric = store.find_metric_or_nil("events", "test.tl").unwrap();
        let ts = metric.get_datum(&[]).unwrap().timestamp();
        assert_eq!(ts, Utc.with_ymd_and_hms(2001, 2, 3, 4, 5, 6).unwrap());

        // Timestamps never move backwards.
        Vm::execute(&program, "1999-01-01T00:00:00 hello", &store).unwrap();
        assert_eq!(metric.get_datum(&[]).unwrap().timestamp(), ts);

        let later = compile("counter events\n/^(\\S+) / { strptime($1, \"%Y-%m-%d\")\n events++ }");
        Vm::execute(&later, "2999-01-01 hello", &store).unwrap();
        let ts = metric.get_datum(&[]).unwrap().timestamp();
        assert_eq!((ts.year(), ts.month(), ts.day()), (2999, 1, 1));
    }

    #[test]
    fn conversion_failure_aborts_the_line() {
        let program = compile("counter total\ncounter seen\n/v=(\\S+)/ { seen++\n total += $1 }");
        let store = Store::new();
        let err = Vm::execute(&program, "v=abc", &store).unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::Conversion { ref value, .. } if value == "abc"));
        assert_eq!(err.program, "test.tl");
        assert_eq!(err.instruction.map(|i| i.opcode), Some(OpCode::S2i));
        // Instructions before the failure already took effect.
        assert_eq!(value(&store, "seen", &[]), Some(Number::Int(1)));

        Vm::execute(&program, "v=7", &store).unwrap();
        assert_eq!(value(&store, "total", &[]), Some(Number::Int(7)));
    }

    #[test]
    fn gauge_takes_decimal_capture() {
        let program = compile("gauge latency\n/took (\\S+)s/ { latency = $1 }");
        let store = Store::new();
        Vm::execute(&program, "took 0.25s", &store).unwrap();
        assert_eq!(value(&store, "latency", &[]), Some(Number::Float(0.25)));
        Vm::execute(&program, "took 3s", &store).unwrap();
        assert_eq!(value(&store, "latency", &[]), Some(Number::Float(3.0)));
    }

    #[test]
    fn both_sides_of_and_provide_captures() {
        let program = compile(
            "counter c by host, n\n/^(?P<host>\\w+) / && /v=(?P<n>\\d+)/ { c[$host, $n]++ }",
        );
        let store = Store::new();
        for line in ["web v=3", "db x=1", "web v=3"] {
            Vm::execute(&program, line, &store).unwrap();
        }
        assert_eq!(value(&store, "c", &["web", "3"]), Some(Number::Int(2)));
        assert_eq!(store.find_metric_or_nil("c", "test.tl").unwrap().len(), 1);
    }

    #[test]
    fn unmatched_capture_is_a_runtime_error() {
        let mut program = Program::new("test.tl");
        let pattern = program.add_pattern("(a)").unwrap();
        program.emit(OpCode::Match, pattern as i64);
        program.emit(OpCode::Push, pattern as i64);
        program.emit(OpCode::Capref, 1);
        let store = Store::new();
        let err = Vm::execute(&program, "b", &store).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::CaptureUnset { pattern: 0 });
        assert!(Vm::execute(&program, "a", &store).unwrap());
    }

    #[test]
    fn aborted_line_leaves_no_empty_tuple() {
        let program = compile("counter c by k\n/(\\S+) (\\S+)/ { c[$1] += $2 }");
        let store = Store::new();
        assert!(Vm::execute(&program, "foo bad", &store).is_err());
        let metric = store.find_metric_or_nil("c", "test.tl").unwrap();
        assert!(metric.is_empty());

        Vm::execute(&program, "foo 4", &store).unwrap();
        assert_eq!(value(&store, "c", &["foo"]), Some(Number::Int(4)));
    }

    #[test]
    fn dload_checks_label_arity() {
        let mut program = Program::new("test.tl");
        program.add_metric(crate::bytecode::MetricDecl {
            name: "c".into(),
            kind: Kind::Counter,
            keys: vec!["a".into(), "b".into()],
            expiry: None,
        });
        program.emit(OpCode::Mload, 0);
        program.emit(OpCode::Push, 1);
        program.emit(OpCode::I2s, 0);
        program.emit(OpCode::Dload, 1);
        let store = Store::new();
        let err = Vm::execute(&program, "x", &store).unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::Metric(_)), "{err}");
    }

    #[test]
    fn optional_group_reads_as_empty() {
        let program = compile("counter n by x\n/a(b)?/ { n[$1]++ }");
        let store = Store::new();
        Vm::execute(&program, "a", &store).unwrap();
        assert_eq!(value(&store, "n", &[""]), Some(Number::Int(1)));
    }

    #[test]
    fn metric_is_registered_on_first_use() {
        let program = compile("counter lines\n/x/ { lines++ }");
        let store = Store::new();
        assert!(store.is_empty());
        Vm::execute(&program, "x", &store).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn parse_timestamp_formats() {
        let zoned = parse_timestamp("%Y-%m-%d %H:%M:%S %z", "2020-01-01 10:00:00 +0200").unwrap();
        assert_eq!(zoned, Utc.with_ymd_and_hms(2020, 1, 1, 8, 0, 0).unwrap());
        let naive = parse_timestamp("%d/%b/%Y:%H:%M:%S", "10/Oct/2000:13:55:36").unwrap();
        assert_eq!(naive, Utc.with_ymd_and_hms(2000, 10, 10, 13, 55, 36).unwrap());
        let date = parse_timestamp("%Y-%m-%d", "2021-06-30").unwrap();
        assert_eq!(date, Utc.with_ymd_and_hms(2021, 6, 30, 0, 0, 0).unwrap());
        assert!(parse_timestamp("%Y-%m-%d", "yesterday").is_err());
    }
}
