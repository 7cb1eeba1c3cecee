//! Bytecode compiler - lowers a program's AST into one linear instruction
//! stream that is run once per input line.

use std::collections::HashMap;
use std::fmt;

use crate::ast::{self, Block, CapRef, Expr, ExprKind, Ident, LogicalOp, MetricRef, RelOp, Stmt, StmtKind};
use crate::lexer::{LineIndex, Span};
use crate::metrics::Kind;

use super::error::{CompileError, CompileErrorKind, CompileResult};
use super::opcode::OpCode;
use super::program::{MetricDecl, Program};

/// Static type of an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Int,
    Float,
    String,
    Time,
    /// Patterns, comparisons and boolean literals: only usable as conditions
    Condition,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Type::Int => "integer",
            Type::Float => "float",
            Type::String => "string",
            Type::Time => "time",
            Type::Condition => "condition",
        })
    }
}

/// Builtin functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    /// `strptime(value, format)`
    Strptime,
    /// `int(x)`
    Int,
    /// `float(x)`
    Float,
    /// `string(x)`
    String,
}

impl Builtin {
    fn lookup(name: &Ident) -> CompileResult<Self> {
        match name.name.as_str() {
            "strptime" => Ok(Builtin::Strptime),
            "int" => Ok(Builtin::Int),
            "float" => Ok(Builtin::Float),
            "string" => Ok(Builtin::String),
            other => Err(CompileError::new(
                CompileErrorKind::UnknownFunction(other.to_string()),
                name.span,
            )),
        }
    }

    const fn arity(self) -> usize {
        match self {
            Builtin::Strptime => 2,
            Builtin::Int | Builtin::Float | Builtin::String => 1,
        }
    }

    const fn result(self) -> Type {
        match self {
            Builtin::Strptime => Type::Time,
            Builtin::Int => Type::Int,
            Builtin::Float => Type::Float,
            Builtin::String => Type::String,
        }
    }
}

/// `cmp` operand for a relational operator, and whether a set matched
/// flag means the relation holds
const fn relop_lowering(op: RelOp) -> (i64, bool) {
    match op {
        RelOp::Lt => (-1, true),
        RelOp::Le => (1, false),
        RelOp::Eq => (0, true),
        RelOp::Ne => (0, false),
        RelOp::Ge => (-1, false),
        RelOp::Gt => (1, true),
    }
}

/// Conversion applied to one side of a comparison given the other side's type
const fn comparison_conversion(this: Type, other: Type) -> Option<OpCode> {
    match (this, other) {
        (Type::String, Type::Int) => Some(OpCode::S2i),
        (Type::String, Type::Float) => Some(OpCode::S2f),
        _ => None,
    }
}

fn mismatch(expected: &'static str, found: Type, span: Span) -> CompileError {
    CompileError::new(CompileErrorKind::TypeMismatch { expected, found }, span)
}

/// The bytecode compiler
pub struct Compiler {
    program: Program,
    errors: Vec<CompileError>,
    index: Option<LineIndex>,
    metric_index: HashMap<String, usize>,
    /// Patterns whose capture groups are in scope, innermost last
    scopes: Vec<usize>,
}

impl Compiler {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            program: Program::new(name),
            errors: Vec::new(),
            index: None,
            metric_index: HashMap::new(),
            scopes: Vec::new(),
        }
    }

    /// Attach the program source so errors carry `line:column`
    #[must_use]
    pub fn with_source(mut self, source: &str) -> Self {
        self.index = Some(LineIndex::new(source));
        self
    }

    /// Compile a whole program. Every error found is reported.
    pub fn compile(mut self, program: &ast::Program) -> Result<Program, Vec<CompileError>> {
        for decl in &program.decls {
            if let Err(e) = self.declare(decl) {
                self.errors.push(e);
            }
        }
        for stmt in &program.stmts {
            self.stmt(stmt);
        }

        if self.errors.is_empty() {
            return Ok(self.program);
        }
        let name = self.program.name().to_string();
        let index = self.index;
        Err(self
            .errors
            .into_iter()
            .map(|mut e| {
                e.program.clone_from(&name);
                e.location = index.as_ref().map(|i| i.location(e.span.start));
                e
            })
            .collect())
    }

    // ==================== Declarations ====================

    fn declare(&mut self, decl: &ast::MetricDecl) -> CompileResult<()> {
        let name = &decl.name.name;
        let declared = MetricDecl {
            name: name.clone(),
            kind: decl.kind,
            keys: decl.keys.iter().map(|k| k.name.clone()).collect(),
            expiry: decl.expiry,
        };
        if let Some(&existing) = self.metric_index.get(name) {
            let previous = &self.program.metrics()[existing];
            if previous.kind == declared.kind && previous.keys == declared.keys {
                return Ok(());
            }
            return Err(CompileError::new(
                CompileErrorKind::ConflictingDeclaration(name.clone()),
                decl.span,
            ));
        }
        let index = self.program.add_metric(declared);
        self.metric_index.insert(name.clone(), index);
        Ok(())
    }

    // ==================== Statements ====================

    fn block(&mut self, block: &Block) {
        for stmt in &block.stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        let depth = self.scopes.len();
        if let Err(e) = self.try_stmt(stmt) {
            self.errors.push(e);
        }
        self.scopes.truncate(depth);
    }

    fn try_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match &stmt.kind {
            StmtKind::Cond {
                cond,
                body,
                else_body,
            } => self.conditional(cond, body, else_body.as_ref()),
            StmtKind::Inc { target, by } => {
                let kind = self.metric_ref(target)?;
                match by {
                    None => {
                        self.program.emit(OpCode::Inc, 0);
                    }
                    Some(by) => {
                        self.number(by, kind)?;
                        self.program.emit(OpCode::Inc, 1);
                    }
                }
                Ok(())
            }
            StmtKind::Assign { target, value } => {
                let kind = self.metric_ref(target)?;
                self.number(value, kind)?;
                self.program.emit(OpCode::Set, 0);
                Ok(())
            }
            StmtKind::Expr(expr) => {
                if self.static_type(expr)? == Type::Condition {
                    // Evaluated for the matched flag and capture registers only.
                    let exits = self.branch(expr, false, true)?;
                    self.patch_all(&exits);
                } else {
                    self.value(expr)?;
                    self.program.emit(OpCode::Pop, 0);
                }
                Ok(())
            }
        }
    }

    fn conditional(&mut self, cond: &Expr, body: &Block, else_body: Option<&Block>) -> CompileResult<()> {
        let depth = self.scopes.len();
        let on_false = self.branch(cond, false, true)?;
        self.block(body);
        self.scopes.truncate(depth);

        match else_body {
            Some(else_body) => {
                let end = self.program.emit_jump(OpCode::Jmp);
                self.patch_all(&on_false);
                self.block(else_body);
                self.program.patch_jump(end);
            }
            None => self.patch_all(&on_false),
        }
        Ok(())
    }

    fn patch_all(&mut self, sites: &[usize]) {
        for &site in sites {
            self.program.patch_jump(site);
        }
    }

    /// `mload` the target, then its labels and `dload` when it has keys.
    /// Returns the target's kind.
    fn metric_ref(&mut self, target: &MetricRef) -> CompileResult<Kind> {
        let name = &target.name.name;
        let Some(&index) = self.metric_index.get(name) else {
            return Err(CompileError::new(
                CompileErrorKind::UndeclaredMetric(name.clone()),
                target.name.span,
            )
            .with_hint(format!("declare it first, e.g. `counter {name}`")));
        };
        let expected = self.program.metrics()[index].keys.len();
        if target.labels.len() != expected {
            return Err(CompileError::new(
                CompileErrorKind::LabelArity {
                    metric: name.clone(),
                    expected,
                    got: target.labels.len(),
                },
                target.span,
            ));
        }

        self.program.emit(OpCode::Mload, index as i64);
        for label in &target.labels {
            self.string(label)?;
        }
        if !target.labels.is_empty() {
            self.program.emit(OpCode::Dload, target.labels.len() as i64);
        }
        Ok(self.program.metrics()[index].kind)
    }

    // ==================== Conditions ====================

    /// Emit `expr` as a condition. The returned jump sites are taken when the
    /// condition's truth equals `jump_when`; otherwise control falls through.
    ///
    /// `scoped` is false below `||` and `!`: a pattern there may not have
    /// matched when the condition holds, so its captures stay out of scope.
    fn branch(&mut self, expr: &Expr, jump_when: bool, scoped: bool) -> CompileResult<Vec<usize>> {
        match &expr.kind {
            ExprKind::Regex(source) => {
                let pattern = self.program.add_pattern(source).map_err(|e| {
                    CompileError::new(
                        CompileErrorKind::InvalidPattern {
                            pattern: source.clone(),
                            message: e.to_string(),
                        },
                        expr.span,
                    )
                })?;
                self.program.emit(OpCode::Match, pattern as i64);
                if scoped {
                    self.scopes.push(pattern);
                }
                Ok(vec![self.jump_if(true, jump_when)])
            }
            ExprKind::Bool(value) => {
                self.program.emit(OpCode::SetMatched, i64::from(*value));
                Ok(vec![self.jump_if(true, jump_when)])
            }
            ExprKind::Compare { left, op, right } => {
                let (operand, flag_is_cond) = relop_lowering(*op);
                self.comparison(left, right, expr.span)?;
                self.program.emit(OpCode::Cmp, operand);
                Ok(vec![self.jump_if(flag_is_cond, jump_when)])
            }
            ExprKind::Not(inner) => self.branch(inner, !jump_when, false),
            ExprKind::Logical { left, op, right } => {
                let either_side_decides =
                    matches!((op, jump_when), (LogicalOp::And, false) | (LogicalOp::Or, true));
                let scoped = scoped && *op == LogicalOp::And;
                if either_side_decides {
                    let mut sites = self.branch(left, jump_when, scoped)?;
                    sites.extend(self.branch(right, jump_when, scoped)?);
                    Ok(sites)
                } else {
                    let skip = self.branch(left, !jump_when, scoped)?;
                    let sites = self.branch(right, jump_when, scoped)?;
                    self.patch_all(&skip);
                    Ok(sites)
                }
            }
            _ => {
                let found = self.static_type(expr)?;
                Err(mismatch("a condition", found, expr.span))
            }
        }
    }

    fn jump_if(&mut self, flag_is_cond: bool, jump_when: bool) -> usize {
        let op = if flag_is_cond == jump_when {
            OpCode::Jm
        } else {
            OpCode::Jnm
        };
        self.program.emit_jump(op)
    }

    /// Push both operands of a comparison, converting a string side to the
    /// other side's numeric type
    fn comparison(&mut self, left: &Expr, right: &Expr, span: Span) -> CompileResult<()> {
        let lt = self.static_type(left)?;
        let rt = self.static_type(right)?;
        let comparable = matches!(
            (lt, rt),
            (Type::Int | Type::Float | Type::String, Type::Int | Type::Float | Type::String)
                | (Type::Time, Type::Time)
        );
        if !comparable {
            let found = if matches!(lt, Type::Condition | Type::Time) { lt } else { rt };
            return Err(mismatch("comparable values", found, span));
        }

        self.value(left)?;
        if let Some(op) = comparison_conversion(lt, rt) {
            self.program.emit(op, 0);
        }
        self.value(right)?;
        if let Some(op) = comparison_conversion(rt, lt) {
            self.program.emit(op, 0);
        }
        Ok(())
    }

    // ==================== Values ====================

    fn static_type(&self, expr: &Expr) -> CompileResult<Type> {
        match &expr.kind {
            ExprKind::Regex(_)
            | ExprKind::Bool(_)
            | ExprKind::Compare { .. }
            | ExprKind::Logical { .. }
            | ExprKind::Not(_) => Ok(Type::Condition),
            ExprKind::Int(_) => Ok(Type::Int),
            ExprKind::Float(_) => Ok(Type::Float),
            ExprKind::Str(_) | ExprKind::CapRef(_) => Ok(Type::String),
            ExprKind::Call { name, .. } => Builtin::lookup(name).map(Builtin::result),
        }
    }

    /// Emit code pushing the value of `expr`, returning its type
    fn value(&mut self, expr: &Expr) -> CompileResult<Type> {
        match &expr.kind {
            ExprKind::Int(value) => {
                self.program.emit(OpCode::Push, *value);
                Ok(Type::Int)
            }
            ExprKind::Float(value) => {
                // `push` only carries integers; floats travel as string constants.
                let index = self.program.add_string(&value.to_string());
                self.program.emit(OpCode::Str, index as i64);
                self.program.emit(OpCode::S2f, 0);
                Ok(Type::Float)
            }
            ExprKind::Str(value) => {
                let index = self.program.add_string(value);
                self.program.emit(OpCode::Str, index as i64);
                Ok(Type::String)
            }
            ExprKind::CapRef(capref) => {
                let (pattern, group) = self.resolve_capture(capref, expr.span)?;
                self.program.emit(OpCode::Push, pattern as i64);
                self.program.emit(OpCode::Capref, group as i64);
                Ok(Type::String)
            }
            ExprKind::Call { name, args } => self.call(name, args, expr.span),
            _ => Err(mismatch("a value", Type::Condition, expr.span)),
        }
    }

    fn call(&mut self, name: &Ident, args: &[Expr], span: Span) -> CompileResult<Type> {
        let builtin = Builtin::lookup(name)?;
        if args.len() != builtin.arity() {
            return Err(CompileError::new(
                CompileErrorKind::WrongArgumentCount {
                    function: name.name.clone(),
                    expected: builtin.arity(),
                    got: args.len(),
                },
                span,
            ));
        }

        match builtin {
            Builtin::Strptime => {
                self.string(&args[0])?;
                self.string(&args[1])?;
                self.program.emit(OpCode::Strptime, 2);
            }
            Builtin::Int => match self.value(&args[0])? {
                Type::Int => {}
                Type::String => {
                    self.program.emit(OpCode::S2i, 0);
                }
                found => return Err(mismatch("an integer or string", found, args[0].span)),
            },
            Builtin::Float => match self.value(&args[0])? {
                Type::Float => {}
                Type::String => {
                    self.program.emit(OpCode::S2f, 0);
                }
                Type::Int => {
                    self.program.emit(OpCode::I2s, 0);
                    self.program.emit(OpCode::S2f, 0);
                }
                found => return Err(mismatch("a number or string", found, args[0].span)),
            },
            Builtin::String => self.string(&args[0])?,
        }
        Ok(builtin.result())
    }

    /// Push `expr` as a string, converting numbers
    fn string(&mut self, expr: &Expr) -> CompileResult<()> {
        match self.value(expr)? {
            Type::String => {}
            Type::Int => {
                self.program.emit(OpCode::I2s, 0);
            }
            Type::Float => {
                self.program.emit(OpCode::F2s, 0);
            }
            found => return Err(mismatch("a string or number", found, expr.span)),
        }
        Ok(())
    }

    /// Push `expr` as a number for a metric of `kind`. Strings become
    /// integers for counters and floats for every other kind.
    fn number(&mut self, expr: &Expr, kind: Kind) -> CompileResult<()> {
        match self.value(expr)? {
            Type::Int | Type::Float => {}
            Type::String => {
                let op = if kind == Kind::Counter { OpCode::S2i } else { OpCode::S2f };
                self.program.emit(op, 0);
            }
            found => return Err(mismatch("a number", found, expr.span)),
        }
        Ok(())
    }

    fn resolve_capture(&self, capref: &CapRef, span: Span) -> CompileResult<(usize, usize)> {
        for &pattern in self.scopes.iter().rev() {
            let regex = &self.program.patterns()[pattern].regex;
            let group = match capref {
                CapRef::Index(n) => (*n < regex.captures_len()).then_some(*n),
                CapRef::Named(name) => regex
                    .capture_names()
                    .position(|c| c == Some(name.as_str())),
            };
            if let Some(group) = group {
                return Ok((pattern, group));
            }
        }
        Err(CompileError::new(
            CompileErrorKind::UndefinedCapture(capref.to_string()),
            span,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Location;
    use crate::parser::Parser;

    fn compile(source: &str) -> Result<Program, Vec<CompileError>> {
        let ast = Parser::parse_program(source).unwrap();
        Compiler::new("test.tl").with_source(source).compile(&ast)
    }

    fn errors(source: &str) -> Vec<CompileErrorKind> {
        compile(source).unwrap_err().into_iter().map(|e| e.kind).collect()
    }

    #[test]
    fn undeclared_metric() {
        let errs = compile("/x/ { hits++ }").unwrap_err();
        assert_eq!(errs[0].kind, CompileErrorKind::UndeclaredMetric("hits".into()));
        assert!(errs[0].hint.is_some());
    }

    #[test]
    fn undefined_capture() {
        assert_eq!(
            errors("counter a by x\n/(a)/ { a[$2]++ }"),
            vec![CompileErrorKind::UndefinedCapture("$2".into())]
        );
        assert_eq!(
            errors("counter a by x\n/(?P<who>a)/ { a[$what]++ }"),
            vec![CompileErrorKind::UndefinedCapture("$what".into())]
        );
        // Captures do not leak out of their block.
        assert_eq!(
            errors("counter a by x\n/(a)/ { a[$1]++ }\na[$1]++"),
            vec![CompileErrorKind::UndefinedCapture("$1".into())]
        );
    }

    #[test]
    fn else_block_cannot_see_condition_captures() {
        assert_eq!(
            errors("counter a by x\n/(a)/ { a[$1]++ } else { a[$1]++ }"),
            vec![CompileErrorKind::UndefinedCapture("$1".into())]
        );
    }

    #[test]
    fn captures_need_a_pattern_that_must_have_matched() {
        assert_eq!(
            errors("counter c by x\n/(a)/ || /(b)/ { c[$1]++ }"),
            vec![CompileErrorKind::UndefinedCapture("$1".into())]
        );
        assert_eq!(
            errors("counter c by x\n!/(a)/ { c[$1]++ }"),
            vec![CompileErrorKind::UndefinedCapture("$1".into())]
        );
        assert_eq!(
            errors("counter c by x\n/(a)/ || $1 == \"a\" { c[\"y\"]++ }"),
            vec![CompileErrorKind::UndefinedCapture("$1".into())]
        );
        // Both sides of `&&` have matched once the body runs.
        assert!(compile("counter c by x, y\n/(a)/ && /(?P<n>b)/ { c[$1, $n]++ }").is_ok());
        // An enclosing pattern stays in scope under an inner `||`.
        assert!(compile("counter c by x\n/(a)/ { /x/ || /y/ { c[$1]++ } }").is_ok());
    }

    #[test]
    fn conflicting_declarations() {
        assert_eq!(
            errors("counter a\ngauge a"),
            vec![CompileErrorKind::ConflictingDeclaration("a".into())]
        );
        assert_eq!(
            errors("counter a by x\ncounter a by y"),
            vec![CompileErrorKind::ConflictingDeclaration("a".into())]
        );
        assert!(compile("counter a by x\ncounter a by x").is_ok());
    }

    #[test]
    fn label_arity() {
        assert_eq!(
            errors("counter a by x, y\n/(a)/ { a[$1]++ }"),
            vec![CompileErrorKind::LabelArity {
                metric: "a".into(),
                expected: 2,
                got: 1
            }]
        );
    }

    #[test]
    fn type_mismatches() {
        assert_eq!(
            errors("counter a by x\n/(.*)/ { a[strptime($1, \"%Y\")]++ }"),
            vec![CompileErrorKind::TypeMismatch {
                expected: "a string or number",
                found: Type::Time
            }]
        );
        assert_eq!(
            errors("counter a\n/(.*)/ { a += /x/ }"),
            vec![CompileErrorKind::TypeMismatch {
                expected: "a value",
                found: Type::Condition
            }]
        );
        assert_eq!(
            errors("counter a\n1 { a++ }"),
            vec![CompileErrorKind::TypeMismatch {
                expected: "a condition",
                found: Type::Int
            }]
        );
    }

    #[test]
    fn invalid_pattern() {
        let errs = errors("counter a\n/(unclosed/ { a++ }");
        assert!(matches!(&errs[0], CompileErrorKind::InvalidPattern { pattern, .. } if pattern == "(unclosed"));
    }

    #[test]
    fn unknown_function_and_arity() {
        assert_eq!(
            errors("nope(1)"),
            vec![CompileErrorKind::UnknownFunction("nope".into())]
        );
        assert_eq!(
            errors("/(.*)/ { strptime($1) }"),
            vec![CompileErrorKind::WrongArgumentCount {
                function: "strptime".into(),
                expected: 2,
                got: 1
            }]
        );
    }

    #[test]
    fn errors_carry_program_and_location() {
        let errs = compile("counter a\n\n/x/ {\n  b++\n}").unwrap_err();
        assert_eq!(errs[0].program, "test.tl");
        assert_eq!(errs[0].location, Some(Location::new(4, 3)));
        assert!(errs[0].to_string().starts_with("test.tl:4:3: metric 'b' is not declared"));
    }

    #[test]
    fn all_errors_are_reported() {
        assert_eq!(compile("/x/ { a++ \n b++ }\nc++").unwrap_err().len(), 3);
    }

    #[test]
    fn patterns_and_strings_are_interned() {
        let program = compile("counter a by x\n/(a)/ { a[\"k\"]++ }\n/(a)/ { a[\"k\"]++ }").unwrap();
        assert_eq!(program.patterns().len(), 1);
        assert_eq!(program.strings(), ["k"]);
    }
}
