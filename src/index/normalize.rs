//! Entity key normalization shared by every index write and read.

/// Trim, drop one layer of matching `"` or `'` quotes, trim again, lower-case.
pub fn normalize_entity(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = strip_wrapping_quotes(trimmed).trim();
    unquoted.to_lowercase()
}

fn strip_wrapping_quotes(s: &str) -> &str {
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}
