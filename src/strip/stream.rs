//! Incremental think-tag stripping for streamed responses
//!
//! One [`StreamTagStripper`] per in-flight response. Fragments arrive with
//! arbitrary boundaries, so a tag may be split anywhere; the stripper holds
//! back only the bytes that could still become a tag (never more than the
//! longer tag) and emits everything else immediately. Output is
//! byte-identical to running [`super::strip_tags`] over the concatenated
//! input, no matter how the stream is chopped.

use super::{find, ThinkTags};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Emitting content while scanning for the start tag
    Passthrough,
    /// Discarding content while scanning for the end tag
    InsideThink,
}

/// Bounded-buffer state machine removing think-tag spans from a byte stream.
///
/// Owned exclusively by the response it serves; operates on raw bytes so
/// fragment boundaries inside multi-byte sequences are harmless.
#[derive(Debug)]
pub struct StreamTagStripper {
    tags: ThinkTags,
    state: State,
    /// Tail of the stream that is a proper prefix of the active tag
    pending: Vec<u8>,
}

impl StreamTagStripper {
    pub fn new(tags: ThinkTags) -> Self {
        Self {
            tags,
            state: State::Passthrough,
            pending: Vec::new(),
        }
    }

    /// Feed one fragment; returns the bytes that are safe to emit now.
    pub fn push(&mut self, fragment: &[u8]) -> Vec<u8> {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(fragment);

        let mut out = Vec::new();
        let mut cursor = 0;

        loop {
            let target = match self.state {
                State::Passthrough => self.tags.start.as_bytes(),
                State::InsideThink => self.tags.end.as_bytes(),
            };
            match find(&buf[cursor..], target) {
                Some(pos) => {
                    if self.state == State::Passthrough {
                        out.extend_from_slice(&buf[cursor..cursor + pos]);
                        self.state = State::InsideThink;
                    } else {
                        self.state = State::Passthrough;
                    }
                    cursor += pos + target.len();
                }
                None => {
                    // Hold back the longest tail that could still complete the
                    // tag; everything before it can never be part of a match.
                    let held = prefix_overlap(&buf[cursor..], target);
                    let safe_end = buf.len() - held;
                    if self.state == State::Passthrough {
                        out.extend_from_slice(&buf[cursor..safe_end]);
                    }
                    self.pending = buf[safe_end..].to_vec();
                    break;
                }
            }
        }

        out
    }

    /// End of stream. In passthrough the held-back bytes never completed a
    /// start tag and are real content, so they are flushed verbatim. Inside an
    /// unclosed think span they are reasoning text and stay hidden.
    pub fn finish(&mut self) -> Vec<u8> {
        let pending = std::mem::take(&mut self.pending);
        match self.state {
            State::Passthrough => pending,
            State::InsideThink => Vec::new(),
        }
    }
}

/// Length of the longest suffix of `hay` that is a proper prefix of `needle`.
fn prefix_overlap(hay: &[u8], needle: &[u8]) -> usize {
    let max = needle.len().saturating_sub(1).min(hay.len());
    (1..=max)
        .rev()
        .find(|&k| hay[hay.len() - k..] == needle[..k])
        .unwrap_or(0)
}
