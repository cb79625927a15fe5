//! Cursor over the source buffer.
//!
//! The lexer never copies source text: tokens are spans with absolute byte
//! offsets. Bracket groups are returned whole (one token spanning the open and
//! close delimiter) so nested regions can be parsed by a sub-lexer over the
//! same buffer.

use crate::ast::Operator;
use crate::error::{CompileError, CompileErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn to(self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }

    /// The region between the delimiters of a bracket group span.
    pub fn inner(self) -> Span {
        Span::new(self.start + 1, self.end.saturating_sub(1).max(self.start + 1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delim {
    Paren,
    Bracket,
    Brace,
}

impl Delim {
    fn open(self) -> char {
        match self {
            Delim::Paren => '(',
            Delim::Bracket => '[',
            Delim::Brace => '{',
        }
    }

    fn from_open(c: u8) -> Option<Delim> {
        match c {
            b'(' => Some(Delim::Paren),
            b'[' => Some(Delim::Bracket),
            b'{' => Some(Delim::Brace),
            _ => None,
        }
    }

    fn close_byte(self) -> u8 {
        match self {
            Delim::Paren => b')',
            Delim::Bracket => b']',
            Delim::Brace => b'}',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Number,
    Str,
    Operator(Operator),
    Not,
    /// `=` (`None`) or a compound assignment such as `+=`.
    Assign(Option<Operator>),
    Incr,
    Decr,
    Dot,
    SafeDot,
    Comma,
    Colon,
    Question,
    Semicolon,
    /// A whole balanced region including its delimiters.
    Group(Delim),
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn text<'s>(&self, src: &'s str) -> &'s str {
        &src[self.span.start..self.span.end]
    }

    pub fn is_ident(&self, src: &str, word: &str) -> bool {
        self.kind == TokenKind::Ident && self.text(src) == word
    }
}

#[derive(Debug, Clone)]
pub struct Lexer<'s> {
    src: &'s str,
    pos: usize,
    end: usize,
    last: Option<(Token, usize)>,
}

impl<'s> Lexer<'s> {
    pub fn new(src: &'s str) -> Self {
        Self::over(src, Span::new(0, src.len()))
    }

    /// A lexer restricted to `range` of `src`.
    pub fn over(src: &'s str, range: Span) -> Self {
        Lexer {
            src,
            pos: range.start,
            end: range.end.min(src.len()),
            last: None,
        }
    }

    pub fn source(&self) -> &'s str {
        self.src
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn end(&self) -> usize {
        self.end
    }

    fn error(&self, kind: CompileErrorKind, msg: impl Into<String>, at: usize) -> CompileError {
        CompileError::new(kind, msg, self.src, at)
    }

    fn peek_byte(&self, at: usize) -> Option<u8> {
        if at < self.end {
            self.src.as_bytes().get(at).copied()
        } else {
            None
        }
    }

    /// Skips whitespace and comments.
    pub fn skip_trivia(&mut self) -> Result<(), CompileError> {
        self.pos = skip_trivia_at(self.src, self.pos, self.end)?;
        Ok(())
    }

    pub fn at_end(&mut self) -> Result<bool, CompileError> {
        self.skip_trivia()?;
        Ok(self.pos >= self.end)
    }

    /// Consumes and classifies the next token.
    pub fn next_sub_token(&mut self) -> Result<Token, CompileError> {
        let before = self.pos;
        self.skip_trivia()?;
        let start = self.pos;
        let kind = match self.peek_byte(start) {
            None => TokenKind::Eof,
            Some(c) if c == b'_' || c == b'$' || c.is_ascii_alphabetic() || c >= 0x80 => {
                self.pos = scan_ident(self.src, start, self.end);
                TokenKind::Ident
            }
            Some(c) if c.is_ascii_digit() => {
                self.pos = self.scan_number(start)?;
                TokenKind::Number
            }
            Some(b'.') if self.peek_byte(start + 1).is_some_and(|d| d.is_ascii_digit()) => {
                self.pos = self.scan_number(start)?;
                TokenKind::Number
            }
            Some(q @ (b'"' | b'\'')) => {
                self.pos = skip_string(self.src, start, self.end, q).ok_or_else(|| {
                    self.error(CompileErrorKind::Unbalanced, "unterminated string literal", start)
                })?;
                TokenKind::Str
            }
            Some(c) if Delim::from_open(c).is_some() => {
                let close = self.balanced_capture(start)?;
                self.pos = close + 1;
                TokenKind::Group(Delim::from_open(c).unwrap_or(Delim::Paren))
            }
            Some(c @ (b')' | b']' | b'}')) => {
                return Err(self.error(
                    CompileErrorKind::Unbalanced,
                    format!("unexpected '{}'", c as char),
                    start,
                ))
            }
            Some(_) => self.scan_operator(start)?,
        };
        let token = Token {
            kind,
            span: Span::new(start, self.pos),
        };
        self.last = Some((token, before));
        Ok(token)
    }

    /// Peeks at the next token without consuming it.
    pub fn peek(&mut self) -> Result<Token, CompileError> {
        let saved = (self.pos, self.last);
        let token = self.next_sub_token()?;
        self.pos = saved.0;
        self.last = saved.1;
        Ok(token)
    }

    /// Un-reads the last token. Only one step is remembered.
    pub fn back(&mut self) {
        if let Some((_, before)) = self.last.take() {
            self.pos = before;
        }
    }

    /// Text of the token just consumed, trimmed.
    pub fn capture(&self) -> &'s str {
        match &self.last {
            Some((token, _)) => token.text(self.src).trim(),
            None => "",
        }
    }

    /// Finds the delimiter closing the group opened at `open`.
    ///
    /// Nested groups of all three kinds, string literals with escaped quotes
    /// and comments are skipped.
    pub fn balanced_capture(&self, open: usize) -> Result<usize, CompileError> {
        let bytes = self.src.as_bytes();
        let first = Delim::from_open(bytes[open]).ok_or_else(|| {
            self.error(CompileErrorKind::Syntax, "expected a bracket", open)
        })?;
        let mut stack = vec![(first, open)];
        let mut i = open + 1;
        while i < self.end {
            let c = bytes[i];
            match c {
                b'"' | b'\'' => {
                    i = skip_string(self.src, i, self.end, c).ok_or_else(|| {
                        self.error(CompileErrorKind::Unbalanced, "unterminated string literal", i)
                    })?;
                    continue;
                }
                b'/' if matches!(bytes.get(i + 1), Some(b'/') | Some(b'*')) => {
                    i = skip_trivia_at(self.src, i, self.end)?;
                    continue;
                }
                b'(' | b'[' | b'{' => {
                    if let Some(d) = Delim::from_open(c) {
                        stack.push((d, i));
                    }
                }
                b')' | b']' | b'}' => {
                    let (delim, at) = stack.pop().unwrap_or((first, open));
                    if delim.close_byte() != c {
                        return Err(self.error(
                            CompileErrorKind::Unbalanced,
                            format!("'{}' closed by '{}'", delim.open(), c as char),
                            at,
                        ));
                    }
                    if stack.is_empty() {
                        return Ok(i);
                    }
                }
                _ => {}
            }
            i += 1;
        }
        let (delim, at) = stack.last().copied().unwrap_or((first, open));
        Err(self.error(
            CompileErrorKind::Unbalanced,
            format!("unterminated '{}'", delim.open()),
            at,
        ))
    }

    fn scan_number(&self, start: usize) -> Result<usize, CompileError> {
        let bytes = self.src.as_bytes();
        let mut i = start;
        let at = |i: usize| if i < self.end { bytes.get(i).copied() } else { None };
        if at(i) == Some(b'0') && matches!(at(i + 1), Some(b'x') | Some(b'X')) {
            i += 2;
            let digits = i;
            while at(i).is_some_and(|c| c.is_ascii_hexdigit()) {
                i += 1;
            }
            if i == digits {
                return Err(self.error(CompileErrorKind::InvalidLiteral, "empty hex literal", start));
            }
        } else {
            while at(i).is_some_and(|c| c.is_ascii_digit()) {
                i += 1;
            }
            if at(i) == Some(b'.') && at(i + 1).is_some_and(|c| c.is_ascii_digit()) {
                i += 1;
                while at(i).is_some_and(|c| c.is_ascii_digit()) {
                    i += 1;
                }
            }
            if matches!(at(i), Some(b'e') | Some(b'E')) {
                let mut j = i + 1;
                if matches!(at(j), Some(b'+') | Some(b'-')) {
                    j += 1;
                }
                if at(j).is_some_and(|c| c.is_ascii_digit()) {
                    i = j;
                    while at(i).is_some_and(|c| c.is_ascii_digit()) {
                        i += 1;
                    }
                }
            }
        }
        if matches!(at(i), Some(b'L' | b'l' | b'd' | b'D' | b'f' | b'F')) {
            i += 1;
        }
        if at(i).is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_') {
            return Err(self.error(
                CompileErrorKind::InvalidLiteral,
                "malformed number literal",
                start,
            ));
        }
        Ok(i)
    }

    fn scan_operator(&mut self, start: usize) -> Result<TokenKind, CompileError> {
        let rest = &self.src[start..self.end];
        const TABLE: &[(&str, TokenKind)] = &[
            (">>>", TokenKind::Operator(Operator::UShr)),
            ("**", TokenKind::Operator(Operator::Pow)),
            ("<<", TokenKind::Operator(Operator::Shl)),
            (">>", TokenKind::Operator(Operator::Shr)),
            ("<=", TokenKind::Operator(Operator::Le)),
            (">=", TokenKind::Operator(Operator::Ge)),
            ("==", TokenKind::Operator(Operator::Eq)),
            ("!=", TokenKind::Operator(Operator::Ne)),
            ("&&", TokenKind::Operator(Operator::And)),
            ("||", TokenKind::Operator(Operator::Or)),
            ("~=", TokenKind::Operator(Operator::RegexMatch)),
            ("++", TokenKind::Incr),
            ("--", TokenKind::Decr),
            ("+=", TokenKind::Assign(Some(Operator::Add))),
            ("-=", TokenKind::Assign(Some(Operator::Sub))),
            ("*=", TokenKind::Assign(Some(Operator::Mul))),
            ("/=", TokenKind::Assign(Some(Operator::Div))),
            ("%=", TokenKind::Assign(Some(Operator::Rem))),
            ("?.", TokenKind::SafeDot),
            ("+", TokenKind::Operator(Operator::Add)),
            ("-", TokenKind::Operator(Operator::Sub)),
            ("*", TokenKind::Operator(Operator::Mul)),
            ("/", TokenKind::Operator(Operator::Div)),
            ("%", TokenKind::Operator(Operator::Rem)),
            ("<", TokenKind::Operator(Operator::Lt)),
            (">", TokenKind::Operator(Operator::Gt)),
            ("&", TokenKind::Operator(Operator::BitAnd)),
            ("^", TokenKind::Operator(Operator::BitXor)),
            ("|", TokenKind::Operator(Operator::BitOr)),
            ("!", TokenKind::Not),
            ("=", TokenKind::Assign(None)),
            (".", TokenKind::Dot),
            (",", TokenKind::Comma),
            (":", TokenKind::Colon),
            ("?", TokenKind::Question),
            (";", TokenKind::Semicolon),
        ];
        for (text, kind) in TABLE {
            if rest.starts_with(text) {
                // `c ?.5 : 1` is a ternary, not a null-safe dot.
                if *kind == TokenKind::SafeDot
                    && rest.as_bytes().get(2).is_some_and(|c| c.is_ascii_digit())
                {
                    continue;
                }
                self.pos = start + text.len();
                return Ok(*kind);
            }
        }
        let c = rest.chars().next().unwrap_or(' ');
        Err(self.error(
            CompileErrorKind::Syntax,
            format!("unexpected character '{}'", c),
            start,
        ))
    }
}

fn scan_ident(src: &str, start: usize, end: usize) -> usize {
    let mut i = start;
    for (off, c) in src[start..end].char_indices() {
        if c == '_' || c == '$' || c.is_alphanumeric() {
            i = start + off + c.len_utf8();
        } else {
            break;
        }
    }
    i
}

/// Returns the offset just past the closing quote, or `None` if unterminated.
fn skip_string(src: &str, start: usize, end: usize, quote: u8) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut i = start + 1;
    while i < end {
        match bytes[i] {
            b'\\' => i += 2,
            c if c == quote => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

fn skip_trivia_at(src: &str, mut i: usize, end: usize) -> Result<usize, CompileError> {
    let bytes = src.as_bytes();
    while i < end {
        match bytes[i] {
            c if c.is_ascii_whitespace() => i += 1,
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < end && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let close = src[i + 2..end].find("*/").ok_or_else(|| {
                    CompileError::new(CompileErrorKind::Unbalanced, "unterminated comment", src, i)
                })?;
                i = i + 2 + close + 2;
            }
            _ => break,
        }
    }
    Ok(i)
}

/// Decodes the escapes of a quoted literal. `span` includes the quotes.
pub fn unescape(src: &str, span: Span) -> Result<String, CompileError> {
    let body = &src[span.start + 1..span.end - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.char_indices();
    while let Some((off, c)) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let at = span.start + 1 + off;
        let bad = || CompileError::new(CompileErrorKind::InvalidLiteral, "invalid escape sequence", src, at);
        let escaped = match chars.next().map(|(_, e)| e).ok_or_else(bad)? {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'b' => '\u{8}',
            'f' => '\u{c}',
            '0' => '\0',
            '\\' => '\\',
            '\'' => '\'',
            '"' => '"',
            'u' => {
                let hex: String = chars.by_ref().take(4).map(|(_, h)| h).collect();
                if hex.len() != 4 {
                    return Err(bad());
                }
                u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(bad)?
            }
            _ => return Err(bad()),
        };
        out.push(escaped);
    }
    Ok(out)
}
