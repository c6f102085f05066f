//! SQL quoting primitives and runtime values.
//!
//! Everything that renders into SQL text goes through [`Ident`] or
//! [`Lit`]; free-form request values never do, they travel as
//! positional parameters instead. The `$n` placeholders are 1-based and
//! numbered left to right — that numbering is the wire contract with the
//! executor and must match the argument list exactly.

use std::fmt;

mod value;
pub use value::{Record, Value};

/// A PostgreSQL identifier wrapper.
///
/// Display writes the value escaped and quoted with double quotes.
///
/// # Example
/// ```
/// use quarry_sql::Ident;
/// assert_eq!(format!("{}", Ident("user")), "\"user\"");
/// assert_eq!(format!("{}", Ident("bla\"h")), "\"bla\"\"h\"");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"")?;
        for c in self.0.as_ref().chars() {
            if c == '"' {
                write!(f, "\"\"")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "\"")
    }
}

/// A PostgreSQL string literal wrapper.
///
/// Display writes the value escaped and quoted with single quotes.
///
/// # Example
/// ```
/// use quarry_sql::Lit;
/// assert_eq!(format!("{}", Lit("foo")), "'foo'");
/// assert_eq!(format!("{}", Lit("it's")), "'it''s'");
/// ```
pub struct Lit<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> fmt::Display for Lit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'")?;
        for c in self.0.as_ref().chars() {
            if c == '\'' {
                write!(f, "''")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "'")
    }
}

/// Quote a PostgreSQL identifier.
///
/// Always quotes, so reserved words like `user`, `order` or `group` are
/// safe to use as table and column names. Doubles any embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("{}", Ident(name))
}

/// Escape a string literal for SQL.
pub fn escape_string(s: &str) -> String {
    format!("{}", Lit(s))
}

/// Render a qualified `"schema"."name"` reference.
pub fn qualify(schema: &str, name: &str) -> String {
    format!("{}.{}", Ident(schema), Ident(name))
}

/// Render the 1-based positional placeholder `$n`.
pub fn placeholder(n: usize) -> String {
    format!("${n}")
}

/// Escape LIKE pattern metacharacters in a fixed prefix or fragment.
///
/// The result matches the input literally under the default `\` escape
/// character; append `%`/`_` afterwards to build the actual pattern.
pub fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("user"), "\"user\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_escape_string() {
        assert_eq!(escape_string("hello"), "'hello'");
        assert_eq!(escape_string("it's"), "'it''s'");
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify("public", "users"), "\"public\".\"users\"");
    }

    #[test]
    fn test_placeholder() {
        assert_eq!(placeholder(1), "$1");
        assert_eq!(placeholder(42), "$42");
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("_quarry_"), "\\_quarry\\_");
        assert_eq!(escape_like("100%"), "100\\%");
        assert_eq!(escape_like("plain"), "plain");
    }
}
