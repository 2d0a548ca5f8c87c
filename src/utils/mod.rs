pub mod error;
pub mod logger;
pub mod validation;
pub mod version;

/// Truncates to `max_chars` characters and appends `...` when anything was cut.
pub fn truncate_for_display(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_display() {
        assert_eq!(truncate_for_display("short", 200), "short");
        assert_eq!(truncate_for_display("abcdef", 3), "abc...");
        // multi-byte characters must not be split
        assert_eq!(truncate_for_display("平安银行股份", 4), "平安银行...");
    }
}
