//! Token types for the tallylog lexer

use std::time::Duration;

use logos::Logos;

/// The kind of token produced by the lexer
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[logos(skip r"([ \t\r\n]+|#[^\n]*)")]
pub enum TokenKind {
    // ========== Declarations ==========
    #[token("counter")]
    Counter,
    #[token("gauge")]
    Gauge,
    #[token("timer")]
    Timer,
    #[token("histogram")]
    Histogram,
    #[token("by")]
    By,
    #[token("expire")]
    Expire,

    // ========== Control ==========
    #[token("else")]
    Else,
    #[token("true")]
    True,
    #[token("false")]
    False,

    // ========== Literals ==========
    /// Integer followed by a unit: `250ms`, `30s`, `5m`, `1h`
    #[regex(r"[0-9]+(ms|s|m|h)")]
    Duration,

    #[regex(r"[0-9]+")]
    Int,

    #[regex(r"[0-9]+\.[0-9]+")]
    Float,

    /// Double-quoted string; `\"` and `\\` are the only escapes
    #[regex(r#""([^"\\\n]|\\.)*""#)]
    String,

    /// Slash-delimited pattern; `\/` embeds a slash
    #[regex(r"/([^/\\\n]|\\.)*/")]
    Regex,

    /// `$1`, `$name`
    #[regex(r"\$[A-Za-z0-9_]+")]
    CapRef,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,

    // ========== Operators ==========
    #[token("++")]
    PlusPlus,
    #[token("+=")]
    PlusEq,
    #[token("=")]
    Eq,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    LtEq,
    #[token(">")]
    Gt,
    #[token(">=")]
    GtEq,
    #[token("&&")]
    And,
    #[token("||")]
    Or,
    #[token("!")]
    Not,

    // ========== Delimiters ==========
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,

    // ========== Special ==========
    /// Produced by the lexer on unrecognised input, never by logos
    Error,
    Eof,
}

impl TokenKind {
    /// Whether this token starts a metric declaration
    #[must_use]
    pub const fn is_metric_kind(self) -> bool {
        matches!(
            self,
            TokenKind::Counter | TokenKind::Gauge | TokenKind::Timer | TokenKind::Histogram
        )
    }

    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            TokenKind::Counter => "'counter'",
            TokenKind::Gauge => "'gauge'",
            TokenKind::Timer => "'timer'",
            TokenKind::Histogram => "'histogram'",
            TokenKind::By => "'by'",
            TokenKind::Expire => "'expire'",
            TokenKind::Else => "'else'",
            TokenKind::True => "'true'",
            TokenKind::False => "'false'",
            TokenKind::Duration => "duration",
            TokenKind::Int => "integer",
            TokenKind::Float => "float",
            TokenKind::String => "string",
            TokenKind::Regex => "pattern",
            TokenKind::CapRef => "capture reference",
            TokenKind::Ident => "identifier",
            TokenKind::PlusPlus => "'++'",
            TokenKind::PlusEq => "'+='",
            TokenKind::Eq => "'='",
            TokenKind::EqEq => "'=='",
            TokenKind::NotEq => "'!='",
            TokenKind::Lt => "'<'",
            TokenKind::LtEq => "'<='",
            TokenKind::Gt => "'>'",
            TokenKind::GtEq => "'>='",
            TokenKind::And => "'&&'",
            TokenKind::Or => "'||'",
            TokenKind::Not => "'!'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::Comma => "','",
            TokenKind::Error => "invalid input",
            TokenKind::Eof => "end of file",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

/// Parse a duration literal such as `250ms`, `30s`, `5m` or `1h`.
///
/// Also accepts a bare integer, read as seconds.
#[must_use]
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let amount: u64 = digits.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(amount)),
        "" | "s" => Some(Duration::from_secs(amount)),
        "m" => amount.checked_mul(60).map(Duration::from_secs),
        "h" => amount.checked_mul(3600).map(Duration::from_secs),
        _ => None,
    }
}
