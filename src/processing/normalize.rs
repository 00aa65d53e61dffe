//! Whitespace normalization applied between extraction and chunking.

/// Collapse all runs of whitespace (spaces, tabs, newlines) into single
/// spaces and trim the ends. Idempotent, and empty input stays empty.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
