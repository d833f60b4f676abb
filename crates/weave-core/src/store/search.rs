//! Full-text query sanitizing.
//!
//! User input never reaches FTS5 as query syntax: it is split into word
//! tokens, bare operators are dropped, and each remaining token is quoted so
//! it matches as a literal term.

/// FTS5 operators that are dropped when they appear as bare words
const RESERVED_OPERATORS: [&str; 4] = ["AND", "OR", "NOT", "NEAR"];

/// Turn free text into a safe FTS5 MATCH expression.
///
/// Returns `None` when nothing searchable is left, in which case the caller
/// should return an empty result instead of querying.
pub fn sanitize_fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|token| !token.is_empty())
        .filter(|token| !RESERVED_OPERATORS.contains(token))
        .map(|token| format!("\"{token}\""))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}
