//! Keyword search against the FTS5 shadow table (`observations_fts`, kept
//! in sync by triggers defined in the migrations). FTS5's query syntax
//! treats `"`, `(`, `)`, `*`, `:`, `-` and a handful of other characters as
//! operators — a raw user query containing any of these can produce a
//! syntax error instead of a search, so every query is sanitized before
//! it reaches `MATCH`.

/// Strips FTS5 operator characters and wraps each remaining token in
/// double quotes so it's always treated as a literal term, never as an
/// operator. An empty result (all-operator input) is treated upstream as
/// "no keyword match" rather than a wildcard.
pub fn sanitize_fts5_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|token| {
            let cleaned: String =
                token.chars().filter(|c| c.is_alphanumeric() || *c == '_' || *c == '\'').collect();
            cleaned
        })
        .filter(|token| !token.is_empty())
        .map(|token| format!("\"{token}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_each_token_as_a_literal() {
        assert_eq!(sanitize_fts5_query("hello world"), "\"hello\" OR \"world\"");
    }

    #[test]
    fn strips_operator_characters() {
        let out = sanitize_fts5_query("hello world \"exact phrase\" OR special-chars!@#");
        assert!(!out.contains('"') || out.matches('"').count() % 2 == 0);
        assert!(out.contains("specialchars"));
    }

    #[test]
    fn all_punctuation_input_yields_empty_string() {
        assert_eq!(sanitize_fts5_query("!@# $%^"), "");
    }

    #[test]
    fn empty_input_yields_empty_string() {
        assert_eq!(sanitize_fts5_query(""), "");
    }
}
