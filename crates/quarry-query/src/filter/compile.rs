//! SQL compilation for parsed filter expressions.

use super::parse::parse;
use super::{CmpOp, FilterExpr, Literal};
use crate::CompileError;
use quarry_schema::Table;
use quarry_sql::{Value, placeholder, quote_ident};

/// A compiled filter: a SQL fragment plus its ordered arguments.
///
/// Placeholders are 1-based and numbered left to right, so `$n` always
/// refers to `args[n - 1]`. An empty filter compiles to an empty
/// fragment with no arguments.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    pub sql: String,
    pub args: Vec<Value>,
}

impl Filter {
    /// Whether this filter has no condition at all.
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

/// Compile a filter expression against a table into SQL.
pub fn compile_filter(table: &Table, input: &str) -> Result<Filter, CompileError> {
    let Some(expr) = parse(table, input)? else {
        return Ok(Filter::default());
    };

    let mut filter = Filter::default();
    compile_expr(&expr, &mut filter);
    Ok(filter)
}

fn compile_expr(expr: &FilterExpr, out: &mut Filter) {
    match expr {
        FilterExpr::And(children) => compile_group(children, " AND ", out),
        FilterExpr::Or(children) => compile_group(children, " OR ", out),
        FilterExpr::Cmp { column, op, value, .. } => {
            out.sql.push_str(&quote_ident(column));
            match (op, value) {
                // Equality against null folds into IS [NOT] NULL and
                // consumes no placeholder.
                (CmpOp::Eq, Literal::Null) => out.sql.push_str(" IS NULL"),
                (CmpOp::Ne, Literal::Null) => out.sql.push_str(" IS NOT NULL"),
                _ => {
                    out.sql.push(' ');
                    out.sql.push_str(op.sql());
                    out.sql.push(' ');
                    out.args.push(literal_value(value));
                    out.sql.push_str(&placeholder(out.args.len()));
                }
            }
        }
        FilterExpr::InList { column, values, .. } => {
            out.sql.push_str(&quote_ident(column));
            out.sql.push_str(" IN (");
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    out.sql.push_str(", ");
                }
                out.args.push(literal_value(value));
                out.sql.push_str(&placeholder(out.args.len()));
            }
            out.sql.push(')');
        }
    }
}

fn compile_group(children: &[FilterExpr], sep: &str, out: &mut Filter) {
    out.sql.push('(');
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            out.sql.push_str(sep);
        }
        compile_expr(child, out);
    }
    out.sql.push(')');
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        // The parser rejects null in argument position.
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(n) => Value::I64(*n),
        Literal::Float(n) => Value::F64(*n),
        Literal::String(s) => Value::String(s.clone()),
    }
}
