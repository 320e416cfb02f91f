//! Think-tag removal from upstream response bodies
//!
//! Reasoning models wrap internal chain-of-thought in sentinel tags
//! (e.g. `<think>...</think>`). This module removes those spans before the
//! client sees them: [`strip_tags`] for complete bodies, and
//! [`stream::StreamTagStripper`] for live byte streams. Both produce
//! identical output for identical input.

pub mod stream;

use serde::{Deserialize, Serialize};

/// Start tag used when neither the variant nor the environment supplies one
pub const DEFAULT_START_TAG: &str = "<think>";
/// End tag used when neither the variant nor the environment supplies one
pub const DEFAULT_END_TAG: &str = "</think>";

/// A start/end sentinel pair delimiting internal reasoning text
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ThinkTags {
    pub start: String,
    pub end: String,
}

impl ThinkTags {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Process-wide default tag pair from `THINK_START_TAG` / `THINK_END_TAG`,
    /// falling back to `<think>` / `</think>`.
    ///
    /// Read once at startup and threaded through explicitly from there.
    pub fn from_env() -> Self {
        Self {
            start: std::env::var("THINK_START_TAG").unwrap_or_else(|_| DEFAULT_START_TAG.to_string()),
            end: std::env::var("THINK_END_TAG").unwrap_or_else(|_| DEFAULT_END_TAG.to_string()),
        }
    }

    /// Length of the longer tag; upper bound for the streaming hold-back buffer
    pub fn max_len(&self) -> usize {
        self.start.len().max(self.end.len())
    }
}

impl Default for ThinkTags {
    fn default() -> Self {
        Self::new(DEFAULT_START_TAG, DEFAULT_END_TAG)
    }
}

/// Remove every `start..end` span (tags included) from a complete body.
///
/// Spans are non-overlapping and removed leftmost-first; text outside spans is
/// preserved byte-for-byte. A start tag that is never closed removes
/// everything from the tag to the end of the body — the same policy the
/// streaming stripper applies, so the two stay byte-identical.
pub fn strip_tags(body: &[u8], tags: &ThinkTags) -> Vec<u8> {
    let start = tags.start.as_bytes();
    let end = tags.end.as_bytes();
    let mut out = Vec::with_capacity(body.len());
    let mut rest = body;

    loop {
        match find(rest, start) {
            None => {
                out.extend_from_slice(rest);
                break;
            }
            Some(pos) => {
                out.extend_from_slice(&rest[..pos]);
                let after = &rest[pos + start.len()..];
                match find(after, end) {
                    Some(epos) => rest = &after[epos + end.len()..],
                    // Unclosed span: reasoning text stays hidden
                    None => break,
                }
            }
        }
    }

    out
}

/// [`strip_tags`] for text bodies.
pub fn strip_text(body: &str, tags: &ThinkTags) -> String {
    String::from_utf8_lossy(&strip_tags(body.as_bytes(), tags)).into_owned()
}

/// First occurrence of `needle` in `haystack`.
pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_single_span() {
        let tags = ThinkTags::default();
        let out = strip_text("Visible <think>secret thoughts</think> content.", &tags);
        assert_eq!(out, "Visible  content.");
    }

    #[test]
    fn test_strip_multiple_spans() {
        let tags = ThinkTags::default();
        let input = "<think>one</think>A<think>two</think>B";
        assert_eq!(strip_text(input, &tags), "AB");
    }

    #[test]
    fn test_text_outside_spans_preserved_exactly() {
        let tags = ThinkTags::default();
        let input = "A <think>x</think> B";
        // Both adjacent spaces survive
        assert_eq!(strip_text(input, &tags), "A  B");
    }

    #[test]
    fn test_no_tags_is_identity() {
        let tags = ThinkTags::default();
        let input = "Plain response with no markup.";
        assert_eq!(strip_text(input, &tags), input);
    }

    #[test]
    fn test_unclosed_span_dropped_to_end() {
        let tags = ThinkTags::default();
        let out = strip_text("Answer: 42 <think>but actually", &tags);
        assert_eq!(out, "Answer: 42 ");
    }

    #[test]
    fn test_custom_tags() {
        let tags = ThinkTags::new("<llm_s>", "</llm_e>");
        let out = strip_text("Data <llm_s>hidden</llm_e> visible.", &tags);
        assert_eq!(out, "Data  visible.");
    }

    #[test]
    fn test_end_tag_without_start_is_content() {
        let tags = ThinkTags::default();
        let input = "stray </think> stays";
        assert_eq!(strip_text(input, &tags), input);
    }

    #[test]
    fn test_utf8_content_around_spans() {
        let tags = ThinkTags::default();
        let out = strip_text("héllo <think>ωμέγα</think> wörld", &tags);
        assert_eq!(out, "héllo  wörld");
    }

    #[test]
    fn test_empty_body() {
        let tags = ThinkTags::default();
        assert_eq!(strip_tags(b"", &tags), b"");
    }

    #[test]
    fn test_find_subslice() {
        assert_eq!(find(b"abcdef", b"cd"), Some(2));
        assert_eq!(find(b"abcdef", b"xy"), None);
        assert_eq!(find(b"ab", b"abcd"), None);
        assert_eq!(find(b"abc", b""), None);
    }

    #[test]
    fn test_tags_from_env_defaults() {
        // Environment left untouched; just exercise the fallback values
        let tags = ThinkTags::default();
        assert_eq!(tags.start, "<think>");
        assert_eq!(tags.end, "</think>");
        assert_eq!(tags.max_len(), "</think>".len());
    }
}
