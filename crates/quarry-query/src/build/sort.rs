//! Sort expression parsing.

use quarry_schema::Table;
use quarry_sql::quote_ident;

/// One resolved sort field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub column: String,
    pub descending: bool,
}

impl SortField {
    /// Render as an ORDER BY item.
    pub fn to_sql(&self) -> String {
        if self.descending {
            format!("{} DESC", quote_ident(&self.column))
        } else {
            quote_ident(&self.column)
        }
    }
}

/// Parse a sort expression: comma-separated column tokens with an
/// optional `-` (descending) or `+` (ascending, the default) prefix.
///
/// Unknown columns are silently dropped rather than errored, so a mixed
/// valid/invalid sort list still succeeds partially.
pub fn parse_sort(table: &Table, spec: &str) -> Vec<SortField> {
    spec.split(',')
        .filter_map(|token| {
            let token = token.trim();
            if token.is_empty() {
                return None;
            }
            let (name, descending) = match token.strip_prefix('-') {
                Some(rest) => (rest, true),
                None => (token.strip_prefix('+').unwrap_or(token), false),
            };
            let name = name.trim();
            table.has_column(name).then(|| SortField {
                column: name.to_string(),
                descending,
            })
        })
        .collect()
}
