//! Greedy token-packing chunker.
//!
//! Normalized text is split on whitespace and packed into chunks whose
//! character count (Unicode scalar values, including joining spaces) never
//! exceeds the configured budget. A token that would overflow the current
//! chunk starts the next one; a single token longer than the whole budget is
//! emitted alone as an oversized chunk rather than split mid-token.

use std::str::SplitWhitespace;

/// Lazy iterator over budgeted chunks of normalized text.
///
/// Restartable in the sense that a fresh iterator over the same text yields
/// the same chunks; no state is shared between iterators.
pub struct Chunks<'a> {
    tokens: SplitWhitespace<'a>,
    carried: Option<&'a str>,
    char_budget: usize,
}

impl<'a> Chunks<'a> {
    /// Create a chunk iterator with the given character budget.
    pub fn new(text: &'a str, char_budget: usize) -> Self {
        Self {
            tokens: text.split_whitespace(),
            carried: None,
            char_budget,
        }
    }
}

impl Iterator for Chunks<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let mut buffer = String::new();
        let mut buffer_chars = 0usize;

        loop {
            let Some(token) = self.carried.take().or_else(|| self.tokens.next()) else {
                break;
            };
            let token_chars = token.chars().count();

            if buffer.is_empty() {
                buffer.push_str(token);
                buffer_chars = token_chars;
                continue;
            }

            // +1 for the joining space
            if buffer_chars + 1 + token_chars > self.char_budget {
                self.carried = Some(token);
                return Some(buffer);
            }
            buffer.push(' ');
            buffer.push_str(token);
            buffer_chars += 1 + token_chars;
        }

        if buffer.is_empty() { None } else { Some(buffer) }
    }
}

/// Split normalized text into chunks of at most `char_budget` characters.
///
/// Joining the returned chunks with single spaces reconstructs the
/// normalized input. Empty or whitespace-only input produces no chunks.
pub fn chunk_text(text: &str, char_budget: usize) -> Vec<String> {
    Chunks::new(text, char_budget).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_text("", 800).is_empty());
        assert!(chunk_text("   ", 800).is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("kia ora koutou", 800);
        assert_eq!(chunks, vec!["kia ora koutou".to_string()]);
    }

    #[test]
    fn chunks_never_exceed_budget() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let chunks = chunk_text(text, 12);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 12, "oversized chunk: {chunk}");
        }
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn overflowing_token_starts_next_chunk() {
        // "one two" is 7 chars; adding " three" would reach 13 > 10
        let chunks = chunk_text("one two three", 10);
        assert_eq!(chunks, vec!["one two".to_string(), "three".to_string()]);
    }

    #[test]
    fn oversized_token_emitted_alone() {
        let long = "a".repeat(40);
        let text = format!("pre {long} post");
        let chunks = chunk_text(&text, 10);
        assert_eq!(chunks, vec!["pre".to_string(), long, "post".to_string()]);
    }

    #[test]
    fn budget_counts_chars_not_bytes() {
        // five two-byte macron vowels plus two spaces fit an 8-char budget
        let chunks = chunk_text("āā ēē īī", 8);
        assert_eq!(chunks, vec!["āā ēē īī".to_string()]);
    }

    #[test]
    fn iterator_restarts_cleanly() {
        let text = "the quick brown fox jumps over the lazy dog";
        let first: Vec<String> = Chunks::new(text, 15).collect();
        let second: Vec<String> = Chunks::new(text, 15).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn join_reconstructs_normalized_text() {
        let text = "the quick brown fox jumps over the lazy dog";
        for budget in [5, 9, 15, 100] {
            assert_eq!(chunk_text(text, budget).join(" "), text);
        }
    }
}
