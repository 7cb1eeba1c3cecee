//! Lexer for tallylog programs
//!
//! Converts program source into a flat token stream. Whitespace and `#`
//! comments are skipped; unrecognised characters become [`TokenKind::Error`]
//! tokens and are reported through [`Lexer::errors`] so the parser can keep
//! going and report everything in one pass.

mod span;
mod token;

pub use span::{LineIndex, Location, Span};
pub use token::{parse_duration, TokenKind};

use logos::Logos;
use thiserror::Error;

/// A token with its kind, span, and source text
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub lexeme: String,
}

impl Token {
    #[must_use]
    pub fn new(kind: TokenKind, span: Span, lexeme: impl Into<String>) -> Self {
        Self {
            kind,
            span,
            lexeme: lexeme.into(),
        }
    }
}

/// Lexer error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexError {
    #[error("unexpected character {0:?}")]
    UnexpectedChar(char),
}

/// A lexer error with location information
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedError {
    pub error: LexError,
    pub span: Span,
}

impl std::fmt::Display for SpannedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.error, self.span)
    }
}

impl std::error::Error for SpannedError {}

/// The tallylog lexer
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, TokenKind>,
    source: &'source str,
    errors: Vec<SpannedError>,
    finished: bool,
}

impl<'source> Lexer<'source> {
    #[must_use]
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: TokenKind::lexer(source),
            source,
            errors: Vec::new(),
            finished: false,
        }
    }

    /// Tokenize the entire source. The returned stream always ends with `Eof`.
    #[must_use]
    pub fn tokenize(source: &str) -> (Vec<Token>, Vec<SpannedError>) {
        let mut lexer = Lexer::new(source);
        let mut tokens: Vec<Token> = lexer.by_ref().collect();
        let end = source.len() as u32;
        tokens.push(Token::new(TokenKind::Eof, Span::new(end, end), ""));
        (tokens, lexer.errors)
    }

    #[must_use]
    pub fn errors(&self) -> &[SpannedError] {
        &self.errors
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let Some(result) = self.inner.next() else {
            self.finished = true;
            return None;
        };
        let span = Span::from(self.inner.span());
        let lexeme = self.inner.slice();
        match result {
            Ok(kind) => Some(Token::new(kind, span, lexeme)),
            Err(()) => {
                let c = self.source[span.as_range()].chars().next().unwrap_or('\0');
                self.errors.push(SpannedError {
                    error: LexError::UnexpectedChar(c),
                    span,
                });
                Some(Token::new(TokenKind::Error, span, lexeme))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_kinds(source: &str) -> Vec<TokenKind> {
        Lexer::tokenize(source).0.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lex_declaration() {
        assert_eq!(
            lex_kinds("counter requests by host, code expire 5m"),
            vec![
                TokenKind::Counter,
                TokenKind::Ident,
                TokenKind::By,
                TokenKind::Ident,
                TokenKind::Comma,
                TokenKind::Ident,
                TokenKind::Expire,
                TokenKind::Duration,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lex_pattern_block() {
        assert_eq!(
            lex_kinds("/GET (\\/\\w+)/ { hits[$1]++ }"),
            vec![
                TokenKind::Regex,
                TokenKind::LBrace,
                TokenKind::Ident,
                TokenKind::LBracket,
                TokenKind::CapRef,
                TokenKind::RBracket,
                TokenKind::PlusPlus,
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lex_operators() {
        assert_eq!(
            lex_kinds("< <= == != >= > && || ! = += ++"),
            vec![
                TokenKind::Lt,
                TokenKind::LtEq,
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::GtEq,
                TokenKind::Gt,
                TokenKind::And,
                TokenKind::Or,
                TokenKind::Not,
                TokenKind::Eq,
                TokenKind::PlusEq,
                TokenKind::PlusPlus,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lex_numbers_and_strings() {
        assert_eq!(
            lex_kinds(r#"42 3.5 250ms "a \"b\"""#),
            vec![
                TokenKind::Int,
                TokenKind::Float,
                TokenKind::Duration,
                TokenKind::String,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            lex_kinds("# leading\ncounter a # trailing\n"),
            vec![TokenKind::Counter, TokenKind::Ident, TokenKind::Eof]
        );
    }

    #[test]
    fn spans_and_lexemes() {
        let (tokens, _) = Lexer::tokenize("gauge  temp");
        assert_eq!(tokens[1].span, Span::new(7, 11));
        assert_eq!(tokens[1].lexeme, "temp");
    }

    #[test]
    fn unexpected_characters_are_reported_and_skipped() {
        let (tokens, errors) = Lexer::tokenize("counter a @ counter b");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error, LexError::UnexpectedChar('@'));
        assert_eq!(errors[0].span, Span::new(10, 11));
        assert_eq!(tokens[2].kind, TokenKind::Error);
        assert_eq!(tokens[3].kind, TokenKind::Counter);
    }
}
