use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Categories of compile failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CompileErrorKind {
    /// Malformed or unexpected syntax.
    #[error("syntax error")]
    Syntax,
    /// A bracket group or quoted literal that never closes.
    #[error("unbalanced delimiter")]
    Unbalanced,
    /// A reserved word used where a name is required.
    #[error("reserved word")]
    ReservedWord,
    /// Strict typing could not resolve a variable, member or class.
    #[error("unresolved type")]
    UnresolvedType,
    /// A typed binding declared twice in the same block with different types.
    #[error("conflicting declaration")]
    Redeclaration,
    /// A literal regular expression that does not compile.
    #[error("invalid regex")]
    InvalidRegex,
    /// A numeric or string literal that cannot be decoded.
    #[error("invalid literal")]
    InvalidLiteral,
}

/// A fatal error raised while turning source text into a compiled expression.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message} (line {line}, column {column})")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
    /// Byte offset into the source.
    pub offset: usize,
    /// 1-based line of `offset`.
    pub line: usize,
    /// 1-based column of `offset`, counted in chars.
    pub column: usize,
    pub source_name: Option<String>,
}

impl CompileError {
    pub fn new(
        kind: CompileErrorKind,
        message: impl Into<String>,
        source: &str,
        offset: usize,
    ) -> Self {
        let (line, column) = line_column(source, offset);
        CompileError {
            kind,
            message: message.into(),
            offset,
            line,
            column,
            source_name: None,
        }
    }

    pub fn with_source_name(mut self, name: Option<&str>) -> Self {
        self.source_name = name.map(str::to_string);
        self
    }

    /// Renders the offending source line with a caret under the error offset.
    pub fn render(&self, source: &str) -> String {
        render_caret(
            &self.to_string(),
            source,
            self.offset,
            self.source_name.as_deref(),
        )
    }
}

/// What went wrong during an evaluation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalErrorKind {
    #[error("unresolvable property or identifier: {0}")]
    UnresolvableProperty(String),

    #[error("null reference while accessing: {0}")]
    NullReference(String),

    #[error("cannot convert {from} to {to}")]
    TypeCoercionFailure { from: String, to: String },

    #[error("failed to invoke {member}: {cause}")]
    InvocationFailure { member: String, cause: String },

    #[error("condition must be a boolean, got {0}")]
    NonBooleanCondition(String),

    #[error("assertion failed: {0}")]
    AssertionFailed(String),

    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: i64, len: usize },

    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    #[error("operator {op} is not defined for {lhs} and {rhs}")]
    InvalidOperation {
        op: String,
        lhs: String,
        rhs: String,
    },

    #[error("not assignable: {0}")]
    NotAssignable(String),

    #[error("call depth exceeded {0}")]
    StackOverflow(usize),
}

impl EvalErrorKind {
    pub fn coercion(from: impl fmt::Display, to: impl fmt::Display) -> Self {
        EvalErrorKind::TypeCoercionFailure {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn invocation(member: impl Into<String>, cause: impl Into<String>) -> Self {
        EvalErrorKind::InvocationFailure {
            member: member.into(),
            cause: cause.into(),
        }
    }

    pub fn invalid_op(op: impl fmt::Display, lhs: impl fmt::Display, rhs: impl fmt::Display) -> Self {
        EvalErrorKind::InvalidOperation {
            op: op.to_string(),
            lhs: lhs.to_string(),
            rhs: rhs.to_string(),
        }
    }
}

/// A failure of a single evaluation call. Never leaves compiled state corrupted.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} (at offset {offset})")]
pub struct EvaluationError {
    pub kind: EvalErrorKind,
    /// Byte offset of the failing node in the source.
    pub offset: usize,
    /// Line of the failing node; present when compiled with debug symbols.
    pub line: Option<usize>,
    pub source_name: Option<Arc<str>>,
}

impl EvaluationError {
    pub fn new(kind: EvalErrorKind, offset: usize) -> Self {
        EvaluationError {
            kind,
            offset,
            line: None,
            source_name: None,
        }
    }

    pub fn render(&self, source: &str) -> String {
        render_caret(
            &self.to_string(),
            source,
            self.offset,
            self.source_name.as_deref(),
        )
    }
}

/// Either half of the engine's error taxonomy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// 1-based (line, column) of a byte offset.
pub fn line_column(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = source.get(..offset).unwrap_or(source);
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let column = before[line_start..].chars().count() + 1;
    (line, column)
}

fn render_caret(message: &str, source: &str, offset: usize, source_name: Option<&str>) -> String {
    let (line, column) = line_column(source, offset);
    let text = source.lines().nth(line - 1).unwrap_or("");
    let mut out = String::new();
    match source_name {
        Some(name) => out.push_str(&format!("{}:{}:{}: {}\n", name, line, column, message)),
        None => out.push_str(&format!("{}:{}: {}\n", line, column, message)),
    }
    out.push_str(text);
    out.push('\n');
    out.push_str(&" ".repeat(column.saturating_sub(1)));
    out.push('^');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_column() {
        let src = "a = 1;\nb = a +;\n";
        assert_eq!(line_column(src, 0), (1, 1));
        assert_eq!(line_column(src, 7), (2, 1));
        assert_eq!(line_column(src, 13), (2, 7));
        assert_eq!(line_column(src, 999), (3, 1));
    }

    #[test]
    fn test_render_caret() {
        let src = "x = 1;\ny = (2 + 3";
        let err = CompileError::new(CompileErrorKind::Unbalanced, "unterminated '('", src, 11);
        let rendered = err.render(src);
        let lines: Vec<&str> = rendered.lines().collect();
        assert!(lines[0].starts_with("2:5:"), "got: {}", rendered);
        assert_eq!(lines[1], "y = (2 + 3");
        assert_eq!(lines[2], "    ^");
    }

    #[test]
    fn test_compile_error_display() {
        assert_eq!(CompileErrorKind::Redeclaration.to_string(), "conflicting declaration");
        let err = CompileError::new(CompileErrorKind::Syntax, "expected ')'", "f(1", 3);
        assert_eq!(err.to_string(), "syntax error: expected ')' (line 1, column 4)");
    }

    #[test]
    fn test_evaluation_error_display() {
        let err = EvaluationError::new(EvalErrorKind::UnresolvableProperty("foo".into()), 4);
        assert_eq!(
            err.to_string(),
            "unresolvable property or identifier: foo (at offset 4)"
        );
        let err: Error = err.into();
        assert!(matches!(err, Error::Evaluation(_)));
    }
}
