//! Error kinds for the three failure domains: syntax, compile and runtime.
//!
//! Runtime errors double as the script's exception records: raising sets the
//! interpreter's pending exception and starts unwinding; uncaught exceptions
//! surface to the host as `ScriptError::Runtime`.

use std::borrow::Cow;
use std::fmt;

use strum::Display;

/// Classification of a runtime exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ExcKind {
    Arithmetic,
    NullDereference,
    Index,
    Type,
    Argument,
    Native,
    Recursion,
}

/// A runtime exception: kind plus formatted message.
///
/// Carried as the interpreter's pending exception while unwinding, and stored
/// on the script as the current exception record once execution returns.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub kind: ExcKind,
    pub message: String,
}

impl RuntimeError {
    pub fn new(kind: ExcKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn divide_by_zero() -> Self {
        Self::new(ExcKind::Arithmetic, "integer divide by zero")
    }

    pub fn modulo_by_zero() -> Self {
        Self::new(ExcKind::Arithmetic, "integer divide by zero in modulo")
    }

    pub fn null_deref(what: &str) -> Self {
        Self::new(ExcKind::NullDereference, format!("null {what} dereferenced"))
    }

    pub fn index_out_of_bounds(index: i64, len: usize) -> Self {
        Self::new(
            ExcKind::Index,
            format!("array index {index} out of bounds (length {len})"),
        )
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

pub type RunResult<T> = Result<T, RuntimeError>;

/// A lexer or parser error, reported with the source position that produced
/// it. Recovery happens at the top-level item boundary: the failing item is
/// dropped and parsing continues.
#[derive(Debug, Clone)]
pub struct SyntaxError {
    pub file: String,
    pub line: u32,
    pub message: String,
}

impl SyntaxError {
    pub fn new(file: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: syntax error: {}", self.file, self.line, self.message)
    }
}

/// An error from type checking or bytecode emission.
///
/// The compiler aborts the failing function on the first of these and moves
/// on to the next function.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub file: String,
    pub line: u32,
    pub message: Cow<'static, str>,
}

impl CompileError {
    pub fn new(file: impl Into<String>, line: u32, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            file: file.into(),
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: compile error: {}", self.file, self.line, self.message)
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Umbrella error for the embedding surface.
#[derive(Debug, Clone)]
pub enum ScriptError {
    Syntax(SyntaxError),
    Compile(CompileError),
    Runtime(RuntimeError),
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax(e) => e.fmt(f),
            Self::Compile(e) => e.fmt(f),
            Self::Runtime(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for ScriptError {}

impl From<SyntaxError> for ScriptError {
    fn from(e: SyntaxError) -> Self {
        Self::Syntax(e)
    }
}

impl From<CompileError> for ScriptError {
    fn from(e: CompileError) -> Self {
        Self::Compile(e)
    }
}

impl From<RuntimeError> for ScriptError {
    fn from(e: RuntimeError) -> Self {
        Self::Runtime(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_display_is_kebab_case() {
        assert_eq!(ExcKind::Arithmetic.to_string(), "arithmetic");
        assert_eq!(ExcKind::NullDereference.to_string(), "null-dereference");
    }

    #[test]
    fn divide_by_zero_mentions_divide() {
        let err = RuntimeError::divide_by_zero();
        assert_eq!(err.kind, ExcKind::Arithmetic);
        assert!(err.message.contains("divide"));
    }
}
