//! Parser for tallylog programs
//!
//! A recursive-descent parser that turns the token stream into an
//! [`ast::Program`](crate::ast::Program). Errors are collected rather than
//! returned at the first failure: after each bad declaration or statement the
//! parser resynchronises at the next plausible boundary and keeps going.
//!
//! ```
//! use tallylog_core::parser::Parser;
//!
//! let program = Parser::parse_program("counter lines\n/$/ { lines++ }").unwrap();
//! assert_eq!(program.decls.len(), 1);
//! assert_eq!(program.stmts.len(), 1);
//! ```

mod error;

pub use error::{ExpectedToken, ParseError, ParseErrorKind};

use crate::ast::{
    Block, CapRef, Expr, ExprKind, Ident, LogicalOp, MetricDecl, MetricRef, Program, RelOp, Stmt,
    StmtKind,
};
use crate::lexer::{parse_duration, LineIndex, Lexer, Span, Token, TokenKind};
use crate::metrics::Kind;

/// Result type for parsing operations
pub type ParseResult<T> = Result<T, ParseError>;

/// The tallylog parser
pub struct Parser {
    /// Tokens with lexer error tokens removed; always ends with `Eof`
    tokens: Vec<Token>,
    position: usize,
    errors: Vec<ParseError>,
    index: LineIndex,
}

impl Parser {
    #[must_use]
    pub fn new(source: &str) -> Self {
        let (mut tokens, lex_errors) = Lexer::tokenize(source);
        tokens.retain(|t| t.kind != TokenKind::Error);
        let errors = lex_errors
            .into_iter()
            .map(|e| ParseError::new(ParseErrorKind::Lex(e.error), e.span))
            .collect();
        Self {
            tokens,
            position: 0,
            errors,
            index: LineIndex::new(source),
        }
    }

    /// Parse a complete program
    pub fn parse_program(source: &str) -> Result<Program, Vec<ParseError>> {
        let mut parser = Parser::new(source);
        let program = parser.program();
        parser.finish(program)
    }

    /// Parse a single condition expression
    pub fn parse_condition(source: &str) -> Result<Expr, Vec<ParseError>> {
        let mut parser = Parser::new(source);
        match parser.condition() {
            Ok(expr) => {
                if !parser.is_eof() {
                    let err = parser.unexpected(ExpectedToken::Token(TokenKind::Eof));
                    parser.errors.push(err);
                }
                parser.finish(expr)
            }
            Err(e) => {
                parser.errors.push(e);
                parser.finish(Expr::new(ExprKind::Bool(false), Span::default()))
            }
        }
    }

    fn finish<T>(mut self, value: T) -> Result<T, Vec<ParseError>> {
        if self.errors.is_empty() {
            return Ok(value);
        }
        self.errors.sort_by_key(|e| e.span.start);
        for error in &mut self.errors {
            error.location = Some(self.index.location(error.span.start));
        }
        Err(self.errors)
    }

    // ==================== Token Management ====================

    fn current(&self) -> &Token {
        // The stream always ends with Eof and `advance` never moves past it.
        &self.tokens[self.position]
    }

    fn current_kind(&self) -> TokenKind {
        self.current().kind
    }

    fn peek_kind(&self) -> TokenKind {
        self.tokens
            .get(self.position + 1)
            .map_or(TokenKind::Eof, |t| t.kind)
    }

    fn previous_span(&self) -> Span {
        self.position
            .checked_sub(1)
            .map_or_else(|| self.current().span, |i| self.tokens[i].span)
    }

    fn is_eof(&self) -> bool {
        self.current_kind() == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if token.kind != TokenKind::Eof {
            self.position += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> Option<Token> {
        if self.check(kind) {
            Some(self.advance())
        } else {
            None
        }
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(ExpectedToken::Token(kind)))
        }
    }

    fn expect_ident(&mut self) -> ParseResult<Ident> {
        let token = self.expect(TokenKind::Ident)?;
        Ok(Ident::new(token.lexeme, token.span))
    }

    fn unexpected(&self, expected: ExpectedToken) -> ParseError {
        ParseError::new(
            ParseErrorKind::UnexpectedToken {
                found: self.current_kind(),
                expected,
            },
            self.current().span,
        )
    }

    // ==================== Declarations ====================

    fn program(&mut self) -> Program {
        let mut decls = Vec::new();
        let mut stmts = Vec::new();
        let start = self.current().span;

        while !self.is_eof() {
            let before = self.position;
            let result = if self.current_kind().is_metric_kind() {
                self.decl().map(|d| decls.push(d))
            } else {
                self.statement().map(|s| stmts.push(s))
            };
            if let Err(e) = result {
                self.errors.push(e);
                if self.position == before {
                    self.advance();
                }
                self.synchronize();
            }
        }

        Program {
            decls,
            stmts,
            span: start.to(self.previous_span()),
        }
    }

    /// `kind name [by key, ...] [expire duration]`
    fn decl(&mut self) -> ParseResult<MetricDecl> {
        let keyword = self.advance();
        let kind = match keyword.kind {
            TokenKind::Counter => Kind::Counter,
            TokenKind::Gauge => Kind::Gauge,
            TokenKind::Timer => Kind::Timer,
            TokenKind::Histogram => Kind::Histogram,
            _ => {
                return Err(ParseError::new(
                    ParseErrorKind::UnexpectedToken {
                        found: keyword.kind,
                        expected: ExpectedToken::Description("metric kind"),
                    },
                    keyword.span,
                ))
            }
        };
        let name = self.expect_ident()?;

        let mut keys = Vec::new();
        if self.eat(TokenKind::By).is_some() {
            keys.push(self.expect_ident()?);
            while self.eat(TokenKind::Comma).is_some() {
                keys.push(self.expect_ident()?);
            }
        }

        let mut expiry = None;
        if self.eat(TokenKind::Expire).is_some() {
            let token = if self.check(TokenKind::Int) {
                self.advance()
            } else {
                self.expect(TokenKind::Duration)?
            };
            let duration = parse_duration(&token.lexeme).ok_or_else(|| {
                ParseError::new(ParseErrorKind::InvalidDuration(token.lexeme.clone()), token.span)
            })?;
            expiry = Some(duration);
        }

        Ok(MetricDecl {
            kind,
            name,
            keys,
            expiry,
            span: keyword.span.to(self.previous_span()),
        })
    }

    // ==================== Statements ====================

    fn statement(&mut self) -> ParseResult<Stmt> {
        if self.check(TokenKind::Ident)
            && matches!(
                self.peek_kind(),
                TokenKind::PlusPlus | TokenKind::PlusEq | TokenKind::Eq | TokenKind::LBracket
            )
        {
            return self.metric_action();
        }

        let cond = self.condition()?;
        if !self.check(TokenKind::LBrace) {
            let span = cond.span;
            return Ok(Stmt::new(StmtKind::Expr(cond), span));
        }

        let body = self.block()?;
        let else_body = if self.eat(TokenKind::Else).is_some() {
            Some(self.block()?)
        } else {
            None
        };
        let span = cond.span.to(self.previous_span());
        Ok(Stmt::new(
            StmtKind::Cond {
                cond,
                body,
                else_body,
            },
            span,
        ))
    }

    /// `name[labels]++`, `name[labels] += expr`, `name[labels] = expr`
    fn metric_action(&mut self) -> ParseResult<Stmt> {
        let target = self.metric_ref()?;
        let start = target.span;
        let kind = match self.current_kind() {
            TokenKind::PlusPlus => {
                self.advance();
                StmtKind::Inc { target, by: None }
            }
            TokenKind::PlusEq => {
                self.advance();
                let by = self.primary()?;
                StmtKind::Inc {
                    target,
                    by: Some(by),
                }
            }
            TokenKind::Eq => {
                self.advance();
                let value = self.primary()?;
                StmtKind::Assign { target, value }
            }
            _ => {
                return Err(self.unexpected(ExpectedToken::Description("'++', '+=' or '='")));
            }
        };
        Ok(Stmt::new(kind, start.to(self.previous_span())))
    }

    fn metric_ref(&mut self) -> ParseResult<MetricRef> {
        let name = self.expect_ident()?;
        let mut labels = Vec::new();
        if self.eat(TokenKind::LBracket).is_some() {
            if !self.check(TokenKind::RBracket) {
                labels.push(self.primary()?);
                while self.eat(TokenKind::Comma).is_some() {
                    labels.push(self.primary()?);
                }
            }
            self.expect(TokenKind::RBracket)?;
        }
        let span = name.span.to(self.previous_span());
        Ok(MetricRef { name, labels, span })
    }

    fn block(&mut self) -> ParseResult<Block> {
        let open = self.expect(TokenKind::LBrace)?;
        let mut stmts = Vec::new();

        while !self.check(TokenKind::RBrace) && !self.is_eof() {
            let before = self.position;
            match self.statement() {
                Ok(stmt) => stmts.push(stmt),
                Err(e) => {
                    self.errors.push(e);
                    if self.position == before {
                        self.advance();
                    }
                    self.synchronize_in_block();
                }
            }
        }

        let close = self.expect(TokenKind::RBrace)?;
        Ok(Block::new(stmts, open.span.to(close.span)))
    }

    // ==================== Expressions ====================

    fn condition(&mut self) -> ParseResult<Expr> {
        self.or()
    }

    fn or(&mut self) -> ParseResult<Expr> {
        let mut left = self.and()?;
        while self.eat(TokenKind::Or).is_some() {
            let right = self.and()?;
            left = logical(left, LogicalOp::Or, right);
        }
        Ok(left)
    }

    fn and(&mut self) -> ParseResult<Expr> {
        let mut left = self.unary()?;
        while self.eat(TokenKind::And).is_some() {
            let right = self.unary()?;
            left = logical(left, LogicalOp::And, right);
        }
        Ok(left)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        if let Some(bang) = self.eat(TokenKind::Not) {
            let operand = self.unary()?;
            let span = bang.span.to(operand.span);
            return Ok(Expr::new(ExprKind::Not(Box::new(operand)), span));
        }
        self.relational()
    }

    fn relational(&mut self) -> ParseResult<Expr> {
        let left = self.primary()?;
        let op = match self.current_kind() {
            TokenKind::Lt => RelOp::Lt,
            TokenKind::LtEq => RelOp::Le,
            TokenKind::EqEq => RelOp::Eq,
            TokenKind::NotEq => RelOp::Ne,
            TokenKind::GtEq => RelOp::Ge,
            TokenKind::Gt => RelOp::Gt,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.primary()?;
        let span = left.span.to(right.span);
        Ok(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                op,
                right: Box::new(right),
            },
            span,
        ))
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let token = self.current().clone();
        let kind = match token.kind {
            TokenKind::Regex => {
                self.advance();
                let body = &token.lexeme[1..token.lexeme.len() - 1];
                ExprKind::Regex(body.replace("\\/", "/"))
            }
            TokenKind::Int => {
                self.advance();
                let value = token.lexeme.parse().map_err(|_| {
                    ParseError::new(
                        ParseErrorKind::InvalidNumber(token.lexeme.clone()),
                        token.span,
                    )
                })?;
                ExprKind::Int(value)
            }
            TokenKind::Float => {
                self.advance();
                let value = token.lexeme.parse().map_err(|_| {
                    ParseError::new(
                        ParseErrorKind::InvalidNumber(token.lexeme.clone()),
                        token.span,
                    )
                })?;
                ExprKind::Float(value)
            }
            TokenKind::String => {
                self.advance();
                let body = &token.lexeme[1..token.lexeme.len() - 1];
                ExprKind::Str(unescape(body).map_err(|kind| ParseError::new(kind, token.span))?)
            }
            TokenKind::CapRef => {
                self.advance();
                let name = &token.lexeme[1..];
                let capref = match name.parse::<usize>() {
                    Ok(index) => CapRef::Index(index),
                    Err(_) => CapRef::Named(name.to_string()),
                };
                ExprKind::CapRef(capref)
            }
            TokenKind::True => {
                self.advance();
                ExprKind::Bool(true)
            }
            TokenKind::False => {
                self.advance();
                ExprKind::Bool(false)
            }
            TokenKind::Ident => return self.call(),
            TokenKind::LParen => {
                self.advance();
                let inner = self.condition()?;
                self.expect(TokenKind::RParen)?;
                return Ok(inner);
            }
            found => {
                return Err(ParseError::new(
                    ParseErrorKind::ExpectedExpression(found),
                    token.span,
                ))
            }
        };
        Ok(Expr::new(kind, token.span))
    }

    /// `name(arg, ...)`
    fn call(&mut self) -> ParseResult<Expr> {
        let name = self.expect_ident()?;
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.check(TokenKind::RParen) {
            args.push(self.primary()?);
            while self.eat(TokenKind::Comma).is_some() {
                args.push(self.primary()?);
            }
        }
        let close = self.expect(TokenKind::RParen)?;
        let span = name.span.to(close.span);
        Ok(Expr::new(ExprKind::Call { name, args }, span))
    }

    // ==================== Error Recovery ====================

    /// Skip to the start of the next top-level declaration or statement
    fn synchronize(&mut self) {
        while !self.is_eof() {
            match self.current_kind() {
                TokenKind::RBrace => {
                    self.advance();
                    return;
                }
                kind if kind.is_metric_kind() => return,
                TokenKind::Regex | TokenKind::Ident => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    /// Skip to the next statement inside a block, stopping before its `}`
    fn synchronize_in_block(&mut self) {
        while !self.is_eof()
            && !matches!(
                self.current_kind(),
                TokenKind::RBrace | TokenKind::Regex | TokenKind::Ident
            )
        {
            self.advance();
        }
    }
}

fn logical(left: Expr, op: LogicalOp, right: Expr) -> Expr {
    let span = left.span.to(right.span);
    Expr::new(
        ExprKind::Logical {
            left: Box::new(left),
            op,
            right: Box::new(right),
        },
        span,
    )
}

fn unescape(body: &str) -> Result<String, ParseErrorKind> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => return Err(ParseErrorKind::InvalidEscape(other)),
            None => return Err(ParseErrorKind::InvalidEscape('\0')),
        }
    }
    Ok(out)
}
