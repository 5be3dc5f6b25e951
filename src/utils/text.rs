//! Text helpers

/// Cut `text` to at most `max_chars` characters without splitting a UTF-8
/// sequence. Returns the original slice when it already fits.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Like [`truncate_chars`], with a trailing marker noting the original length.
pub fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    let cut = truncate_chars(text, max_chars);
    if cut.len() == text.len() {
        return text.to_string();
    }
    format!(
        "{}...\n[Truncated, {} chars total]",
        cut,
        text.chars().count()
    )
}
