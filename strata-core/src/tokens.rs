//! Token estimation and truncation

// ============================================================================
// TOKEN ESTIMATION
// ============================================================================

/// Estimate token count for text at roughly four characters per token.
///
/// Returns 0 for empty text and at least 1 otherwise.
pub fn estimate_tokens(text: &str) -> i32 {
    let chars = text.chars().count();
    if chars == 0 {
        return 0;
    }
    chars.div_ceil(4) as i32
}

/// Approximate character capacity of a token budget.
pub fn chars_for_tokens(tokens: i32) -> usize {
    if tokens <= 0 {
        0
    } else {
        tokens as usize * 4
    }
}

// ============================================================================
// SMART TRUNCATION
// ============================================================================

/// Truncate text to fit within a token budget.
/// Prefers sentence boundaries, falls back to word boundaries.
pub fn truncate_to_token_budget(text: &str, budget: i32) -> String {
    if budget <= 0 {
        return String::new();
    }
    truncate_chars(text, chars_for_tokens(budget))
}

/// Truncate text to at most `max_chars` characters, preferring a sentence
/// boundary in the latter half or a word boundary in the last fifth.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let truncated = safe_truncate(text, max_chars);

    let last_sentence = ['.', '?', '!']
        .into_iter()
        .filter_map(|c| truncated.rfind(c))
        .max();

    if let Some(pos) = last_sentence {
        if pos > truncated.len() / 2 {
            return truncated[..=pos].to_string();
        }
    }

    if let Some(pos) = truncated.rfind(' ') {
        if pos > truncated.len() * 4 / 5 {
            return truncated[..pos].to_string();
        }
    }

    truncated.to_string()
}

/// Truncate to a character count at a UTF-8 boundary.
fn safe_truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

/// Single-line title for a body of text: the first non-empty line,
/// cut to `max_tokens` with an ellipsis when shortened.
pub fn title_line(text: &str, max_tokens: i32) -> String {
    let first = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");
    let max_chars = chars_for_tokens(max_tokens);
    if first.chars().count() <= max_chars {
        return first.to_string();
    }
    let cut = safe_truncate(first, max_chars.saturating_sub(3));
    format!("{}...", cut.trim_end())
}

// =============================================================================
// TESTS
// =============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Truncated text always fits the budget.
        #[test]
        fn prop_truncation_fits_budget(text in ".{0,400}", budget in 1i32..50) {
            let out = truncate_to_token_budget(&text, budget);
            prop_assert!(estimate_tokens(&out) <= budget);
            prop_assert!(text.starts_with(&out));
        }
    }
}
