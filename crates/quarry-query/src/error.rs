//! Compilation errors.

use thiserror::Error;

/// Error compiling client-supplied filter, sort or identifier input.
///
/// These are always client-fixable bad requests: positions are byte
/// offsets into the original input so callers can produce precise
/// messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unterminated string literal starting at position {pos}")]
    UnterminatedString { pos: usize },

    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEnd { expected: &'static str },

    #[error("unexpected {found} at position {pos}, expected {expected}")]
    UnexpectedToken {
        found: String,
        pos: usize,
        expected: &'static str,
    },

    #[error("unknown column '{column}' at position {pos}")]
    UnknownColumn { column: String, pos: usize },

    #[error("operator '{op}' cannot compare against null (position {pos})")]
    NullComparison { op: String, pos: usize },

    #[error("table '{table}' has no primary key")]
    NoPrimaryKey { table: String },

    #[error("no recognized columns in payload for table '{table}'")]
    EmptyPayload { table: String },
}
