//! Rough token accounting for prompt sections.

/// Estimated token count: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Cut `text` so that `estimate_tokens` stays within `max_tokens`.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> &str {
    let max_chars = max_tokens.saturating_mul(4);
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "ééééé";
        let cut = truncate_to_tokens(text, 1);
        assert_eq!(cut, "éééé");
        assert_eq!(truncate_to_tokens(text, 10), text);
        assert_eq!(truncate_to_tokens(text, 0), "");
    }
}
