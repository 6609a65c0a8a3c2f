//! Lexical helpers used by the FAQ ranker.
//!
//! Tokens are compared by exact string equality. There is no stemming, so
//! "карты" and "карту" are different tokens.

const STRIPPED_CHARS: [char; 3] = ['?', ',', '.'];

/// Lowercase `text`, drop `?`, `,` and `.`, then split on runs of whitespace.
pub fn normalize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .filter(|c| !STRIPPED_CHARS.contains(c))
        .collect();
    cleaned.split_whitespace().map(str::to_string).collect()
}

/// Count the query tokens (repeats included) that occur anywhere in `target`.
pub fn score(query_tokens: &[String], target_tokens: &[String]) -> usize {
    query_tokens
        .iter()
        .filter(|token| target_tokens.contains(token))
        .count()
}
