//! Word-budget truncation for prompts sent to the model.

/// Approximate tokens per English word.
pub const TOKENS_PER_WORD: f64 = 1.33;
/// Headroom kept below the model context length.
pub const SAFETY_MARGIN: f64 = 1.2;

/// Word budget that fits a prompt into `context_length` tokens.
pub fn max_words(context_length: usize) -> usize {
    (context_length as f64 / (TOKENS_PER_WORD * SAFETY_MARGIN)) as usize
}

/// Keep only the trailing `max_words` whitespace-separated words of `text`.
///
/// Text within budget is returned unchanged. Truncated text is re-joined with
/// single spaces, so the most recent context survives at the cost of layout.
pub fn truncate_left(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.to_string();
    }
    words[words.len() - max_words..].join(" ")
}
