//! The filter expression compiler.
//!
//! Split into the usual three stages: [`lex`] produces tokens with byte
//! positions, [`parse`] builds the AST while validating every column
//! reference against the target table, and [`compile`] walks the AST
//! emitting SQL with 1-based positional placeholders.

pub mod compile;
pub mod lex;
pub mod parse;

pub use compile::{Filter, compile_filter};

/// A literal value appearing in a filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `~` (compiles to LIKE; the caller supplies wildcards)
    Like,
    /// `!~` (compiles to NOT LIKE)
    NotLike,
}

impl CmpOp {
    /// The operator as written in the filter language.
    pub fn as_str(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Like => "~",
            CmpOp::NotLike => "!~",
        }
    }

    /// The SQL rendering of the operator.
    pub fn sql(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Like => "LIKE",
            CmpOp::NotLike => "NOT LIKE",
        }
    }
}

/// A parsed filter expression.
///
/// `And`/`Or` nodes always hold at least two children; the parser
/// collapses single-element groups into the child itself.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    /// Conjunction of two or more expressions.
    And(Vec<FilterExpr>),
    /// Disjunction of two or more expressions.
    Or(Vec<FilterExpr>),
    /// `column op value`
    Cmp {
        column: String,
        op: CmpOp,
        value: Literal,
        /// Byte position of the column identifier.
        pos: usize,
    },
    /// `column IN (v1, v2, ...)`
    InList {
        column: String,
        values: Vec<Literal>,
        /// Byte position of the column identifier.
        pos: usize,
    },
}
