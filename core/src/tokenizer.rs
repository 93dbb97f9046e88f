//! Rule text tokenizing and range-separator normalization.

use std::sync::OnceLock;

use regex::Regex;

/// Separator placed between the default and file halves of a merged rule string.
pub const MERGE_SEPARATOR: &str = "|";

/// Rule separators: comma, pipe, semicolon and every line terminator.
pub fn is_separator(c: char) -> bool {
    matches!(
        c,
        ',' | '|' | ';' | '\n' | '\r' | '\u{0B}' | '\u{0C}' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

/// Split rule text into trimmed, non-empty tokens, preserving order.
///
/// A run of consecutive separators counts as one.
pub fn tokenize(rules: &str) -> Vec<&str> {
    rules
        .split(is_separator)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .collect()
}

fn tilde_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*~\s*").ok()).as_ref()
}

/// Rewrite `a ~ b` range separators to `a-b` and trim the result.
///
/// `/` and `*` are left alone, so CIDR and wildcard tokens survive unchanged.
pub fn normalize_rules(rules: &str) -> String {
    if rules.trim().is_empty() {
        return rules.to_string();
    }
    match tilde_regex() {
        Some(re) => re.replace_all(rules, "-").trim().to_string(),
        None => rules.replace('~', "-").trim().to_string(),
    }
}

/// Merge default and file rule text; the file half is appended after the default.
pub fn merge_rules(default_rules: &str, file_rules: &str) -> String {
    if file_rules.trim().is_empty() {
        default_rules.to_string()
    } else {
        format!("{}{}{}", default_rules, MERGE_SEPARATOR, file_rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_mixed_separators() {
        let tokens = tokenize("a,b|c\nd;e");
        assert_eq!(tokens, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_tokenize_collapses_runs_and_trims() {
        let tokens = tokenize("  10.0.0.1 ,, | ;\r\n 10.0.0.2  |||\n");
        assert_eq!(tokens, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_tokenize_unicode_line_terminators() {
        let tokens = tokenize("1.1.1.1\u{2028}2.2.2.2\u{85}3.3.3.3");
        assert_eq!(tokens, vec!["1.1.1.1", "2.2.2.2", "3.3.3.3"]);
    }

    #[test]
    fn test_tokenize_empty_input() {
        assert!(tokenize("").is_empty());
        assert!(tokenize(" | , ; \n").is_empty());
    }

    #[test]
    fn test_tokenize_keeps_inner_spaces() {
        // Range padding is handled by the classifier, not the tokenizer.
        assert_eq!(tokenize("10.0.0.1 - 10.0.0.9"), vec!["10.0.0.1 - 10.0.0.9"]);
    }

    #[test]
    fn test_normalize_tilde_ranges() {
        assert_eq!(
            normalize_rules("10.0.0.0~10.255.255.255|172.16.0.0 ~ 172.31.255.255"),
            "10.0.0.0-10.255.255.255|172.16.0.0-172.31.255.255"
        );
    }

    #[test]
    fn test_normalize_leaves_cidr_and_wildcard() {
        assert_eq!(normalize_rules(" 10.0.0.0/8|192.168.1.* "), "10.0.0.0/8|192.168.1.*");
    }

    #[test]
    fn test_normalize_blank_is_untouched() {
        assert_eq!(normalize_rules(""), "");
        assert_eq!(normalize_rules("   "), "   ");
    }

    #[test]
    fn test_merge_rules() {
        assert_eq!(merge_rules("10.0.0.0/8", ""), "10.0.0.0/8");
        assert_eq!(merge_rules("10.0.0.0/8", "  \n"), "10.0.0.0/8");
        assert_eq!(merge_rules("10.0.0.0/8", "1.2.3.4"), "10.0.0.0/8|1.2.3.4");
    }
}
