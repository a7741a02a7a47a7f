//! Sensitive content stripping (spec.md §9). Both `<private>...</private>`
//! blocks and operator-configured regex patterns are removed before text
//! is ever handed to the compressor or persisted as narrative. Grounded in
//! the "strip before persistence" shape of `opencode-mem`'s
//! `filter_private_content`/`filter_injected_memory` calls in
//! `observation_service/mod.rs`, reimplemented here with `regex` rather
//! than the original's ad hoc string scanning.

use regex::Regex;
use std::sync::OnceLock;

fn private_block_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)<private>.*?</private>").expect("valid static regex"))
}

/// Removes `<private>...</private>` blocks, then every pattern in
/// `sensitive_patterns` (already-compiled, invalid patterns are logged and
/// skipped rather than failing the whole redaction pass).
pub fn strip(text: &str, sensitive_patterns: &[String]) -> String {
    let mut out = private_block_pattern().replace_all(text, "").into_owned();
    for pattern in sensitive_patterns {
        match Regex::new(pattern) {
            Ok(re) => out = re.replace_all(&out, "[redacted]").into_owned(),
            Err(e) => tracing::warn!(pattern, error = %e, "invalid sensitivePatterns entry, skipping"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_private_blocks() {
        let input = "before <private>secret key abc123</private> after";
        assert_eq!(strip(input, &[]), "before  after");
    }

    #[test]
    fn strips_multiline_private_blocks() {
        let input = "keep\n<private>\nsk-123456\n</private>\nkeep too";
        let out = strip(input, &[]);
        assert!(!out.contains("sk-123456"));
        assert!(out.contains("keep too"));
    }

    #[test]
    fn applies_configured_regex_patterns() {
        let input = "my email is test@example.com, call me";
        let out = strip(input, &[r"[\w.+-]+@[\w-]+\.[\w.-]+".to_string()]);
        assert_eq!(out, "my email is [redacted], call me");
    }

    #[test]
    fn invalid_pattern_is_skipped_not_fatal() {
        let input = "unchanged text";
        let out = strip(input, &["(unclosed".to_string()]);
        assert_eq!(out, "unchanged text");
    }
}
