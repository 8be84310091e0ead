//! Small helpers shared across the codebase.

/// Truncates a string to at most `max_chars` characters, appending "..." when
/// anything was cut.
///
/// Counts characters, not bytes, so multi-byte content (emoji, CJK) never
/// splits mid-codepoint. Used for derived conversation titles, rolling
/// summaries, and logged response bodies.
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    const SUFFIX: &str = "...";

    // Byte length bounds char count from above, so this is a cheap exit.
    if s.len() <= max_chars {
        return s.to_string();
    }

    let char_count = s.chars().count();
    if char_count <= max_chars {
        return s.to_string();
    }

    let suffix_len = SUFFIX.chars().count();
    if max_chars <= suffix_len {
        return SUFFIX.chars().take(max_chars).collect();
    }

    let kept: String = s.chars().take(max_chars - suffix_len).collect();
    format!("{}{}", kept, SUFFIX)
}
