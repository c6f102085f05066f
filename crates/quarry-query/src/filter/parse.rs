//! Recursive-descent parser for filter expressions.
//!
//! Column references are validated against the target table while
//! parsing, so an unknown column aborts compilation before any SQL is
//! produced.

use super::lex::{Spanned, Token, tokenize};
use super::{CmpOp, FilterExpr, Literal};
use crate::CompileError;
use quarry_schema::Table;

/// Parse a filter expression against a table's columns.
///
/// Empty (or all-whitespace) input parses to `None`: no filter.
pub fn parse(table: &Table, input: &str) -> Result<Option<FilterExpr>, CompileError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Ok(None);
    }

    let mut parser = Parser { table, tokens, idx: 0 };
    let expr = parser.parse_or()?;
    if let Some(spanned) = parser.peek() {
        return Err(CompileError::UnexpectedToken {
            found: spanned.token.to_string(),
            pos: spanned.pos,
            expected: "end of input",
        });
    }
    Ok(Some(expr))
}

struct Parser<'a> {
    table: &'a Table,
    tokens: Vec<Spanned>,
    idx: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.idx)
    }

    fn next(&mut self) -> Option<Spanned> {
        let spanned = self.tokens.get(self.idx).cloned();
        if spanned.is_some() {
            self.idx += 1;
        }
        spanned
    }

    fn expect(&mut self, want: &Token, expected: &'static str) -> Result<(), CompileError> {
        match self.next() {
            Some(spanned) if spanned.token == *want => Ok(()),
            Some(spanned) => Err(CompileError::UnexpectedToken {
                found: spanned.token.to_string(),
                pos: spanned.pos,
                expected,
            }),
            None => Err(CompileError::UnexpectedEnd { expected }),
        }
    }

    fn parse_or(&mut self) -> Result<FilterExpr, CompileError> {
        let mut children = vec![self.parse_and()?];
        while matches!(self.peek(), Some(s) if s.token == Token::Or) {
            self.next();
            children.push(self.parse_and()?);
        }
        Ok(if children.len() == 1 {
            children.pop().expect("at least one child")
        } else {
            FilterExpr::Or(children)
        })
    }

    fn parse_and(&mut self) -> Result<FilterExpr, CompileError> {
        let mut children = vec![self.parse_primary()?];
        while matches!(self.peek(), Some(s) if s.token == Token::And) {
            self.next();
            children.push(self.parse_primary()?);
        }
        Ok(if children.len() == 1 {
            children.pop().expect("at least one child")
        } else {
            FilterExpr::And(children)
        })
    }

    fn parse_primary(&mut self) -> Result<FilterExpr, CompileError> {
        match self.next() {
            Some(Spanned { token: Token::LParen, .. }) => {
                let expr = self.parse_or()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(expr)
            }
            Some(Spanned { token: Token::Ident(column), pos }) => {
                self.parse_comparison(column, pos)
            }
            Some(spanned) => Err(CompileError::UnexpectedToken {
                found: spanned.token.to_string(),
                pos: spanned.pos,
                expected: "column name or '('",
            }),
            None => Err(CompileError::UnexpectedEnd {
                expected: "column name or '('",
            }),
        }
    }

    fn parse_comparison(&mut self, column: String, pos: usize) -> Result<FilterExpr, CompileError> {
        if !self.table.has_column(&column) {
            return Err(CompileError::UnknownColumn { column, pos });
        }

        match self.next() {
            Some(Spanned { token: Token::In, .. }) => {
                self.expect(&Token::LParen, "'('")?;
                let mut values = vec![self.parse_value()?];
                while matches!(self.peek(), Some(s) if s.token == Token::Comma) {
                    self.next();
                    values.push(self.parse_value()?);
                }
                self.expect(&Token::RParen, "')'")?;
                Ok(FilterExpr::InList { column, values, pos })
            }
            Some(spanned) => {
                let op = match spanned.token {
                    Token::Eq => CmpOp::Eq,
                    Token::Ne => CmpOp::Ne,
                    Token::Gt => CmpOp::Gt,
                    Token::Ge => CmpOp::Ge,
                    Token::Lt => CmpOp::Lt,
                    Token::Le => CmpOp::Le,
                    Token::Like => CmpOp::Like,
                    Token::NotLike => CmpOp::NotLike,
                    other => {
                        return Err(CompileError::UnexpectedToken {
                            found: other.to_string(),
                            pos: spanned.pos,
                            expected: "comparison operator",
                        });
                    }
                };
                let value_pos = self.peek().map(|s| s.pos).unwrap_or(spanned.pos);
                let value = self.parse_value()?;
                // Only equality operators fold into IS [NOT] NULL; anything
                // else against null has no meaningful SQL rendering.
                if value == Literal::Null && !matches!(op, CmpOp::Eq | CmpOp::Ne) {
                    return Err(CompileError::NullComparison {
                        op: op.as_str().to_string(),
                        pos: value_pos,
                    });
                }
                Ok(FilterExpr::Cmp { column, op, value, pos })
            }
            None => Err(CompileError::UnexpectedEnd {
                expected: "comparison operator",
            }),
        }
    }

    fn parse_value(&mut self) -> Result<Literal, CompileError> {
        match self.next() {
            Some(Spanned { token: Token::Str(s), .. }) => Ok(Literal::String(s)),
            Some(Spanned { token: Token::Int(n), .. }) => Ok(Literal::Int(n)),
            Some(Spanned { token: Token::Float(n), .. }) => Ok(Literal::Float(n)),
            Some(Spanned { token: Token::True, .. }) => Ok(Literal::Bool(true)),
            Some(Spanned { token: Token::False, .. }) => Ok(Literal::Bool(false)),
            Some(Spanned { token: Token::Null, .. }) => Ok(Literal::Null),
            Some(spanned) => Err(CompileError::UnexpectedToken {
                found: spanned.token.to_string(),
                pos: spanned.pos,
                expected: "value",
            }),
            None => Err(CompileError::UnexpectedEnd { expected: "value" }),
        }
    }
}
