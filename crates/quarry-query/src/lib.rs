//! Filter compilation and query building for quarry.
//!
//! This crate turns client-supplied filter, sort and pagination input
//! into parameterized SQL, validated against a schema snapshot. It never
//! executes anything: every function here is a pure mapping from
//! `(table metadata, request input)` to `(SQL text, ordered arguments)`.
//!
//! The filter language is a small expression grammar:
//!
//! ```text
//! expr       := orExpr
//! orExpr     := andExpr (("||" | OR) andExpr)*
//! andExpr    := primary (("&&" | AND) primary)*
//! primary    := "(" expr ")" | comparison
//! comparison := ident op value | ident IN "(" value ("," value)* ")"
//! value      := string | number | bool | null
//! ```
//!
//! AND binds tighter than OR, so `a=1 || b=2 && c=3` compiles as
//! `a=1 OR (b=2 AND c=3)`.

mod error;
pub use error::CompileError;

pub mod filter;
pub use filter::{CmpOp, Filter, FilterExpr, Literal, compile_filter};

pub mod build;
pub use build::{
    ListParams, ListQuery, Query, SortField, delete, insert, list, parse_sort, select_one, update,
};
