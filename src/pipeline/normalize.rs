//! Whitespace normalization and length limiting.

/// Collapse every run of whitespace (spaces, tabs, newlines, form feeds,
/// non-breaking spaces) into a single space and trim both ends.
///
/// Total and idempotent: `normalize_whitespace(normalize_whitespace(x)) ==
/// normalize_whitespace(x)`.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The longest prefix of `text` holding at most `max_chars` characters.
///
/// Counts `char`s, not bytes, so a multi-byte character is never split.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_mixed_whitespace() {
        assert_eq!(
            normalize_whitespace("  ACME\n\nCorp\t\tTotal:  500 "),
            "ACME Corp Total: 500"
        );
    }

    #[test]
    fn handles_unicode_spaces() {
        assert_eq!(normalize_whitespace("IVA\u{00A0}21%\u{2003}x"), "IVA 21% x");
    }

    #[test]
    fn empty_and_blank_inputs() {
        assert_eq!(normalize_whitespace(""), "");
        assert_eq!(normalize_whitespace(" \n\t "), "");
    }

    #[test]
    fn idempotent() {
        let once = normalize_whitespace("a \n b\r\n\r\nc");
        assert_eq!(normalize_whitespace(&once), once);
    }

    #[test]
    fn truncate_counts_characters() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("ñandú", 4), "ñand");
        assert_eq!(truncate_chars("€€€", 2), "€€");
        assert_eq!(truncate_chars("", 5), "");
    }

    #[test]
    fn truncate_to_six_thousand() {
        let long = "x".repeat(10_000);
        assert_eq!(truncate_chars(&long, 6000).chars().count(), 6000);
    }
}
