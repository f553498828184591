//! Sentence segmenter — turns a streamed answer into speakable units.
//!
//! Two regimes trade latency against prosody:
//!
//! - The **first unit** of a turn is cut at the earliest terminator once it
//!   holds `first_unit_min_words` words, so audio starts almost immediately.
//!   With `first_unit_soft_breaks` a comma, semicolon or colon also counts.
//! - **Later units** wait for `sentences_per_unit` complete sentences and cut
//!   after the last one, which gives the synthesizer enough context for
//!   natural intonation.
//!
//! Run-on text with no usable terminator is cut once it exceeds
//! `max_words_per_unit` words. Cue markers are never split: text after a
//! `[` waits until the marker closes, or until it has run past the marker
//! length cap and the `[` turns out to be ordinary text.

use tracing::trace;

use crate::config::SegmentationConfig;
use crate::cue::{self, MarkerSpan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakKind {
    /// `.` `!` `?` followed by whitespace or the end of the buffer.
    Sentence,
    /// `,` `;` `:` followed by whitespace.
    Clause,
    /// Whitespace between two words.
    Word,
}

/// A position where the buffer may be cut.
#[derive(Debug, Clone, Copy)]
struct Break {
    kind: BreakKind,
    /// Byte offset just past the break.
    end: usize,
    /// Speakable words in `buffer[..end]`.
    words: usize,
}

/// Every cut candidate of a buffer, plus its total word count.
#[derive(Debug, Default)]
struct Scan {
    breaks: Vec<Break>,
    words: usize,
}

impl Scan {
    /// Scan up to the first marker that has not closed yet.
    ///
    /// A `[` only opens a marker under the extractor's rule (see
    /// [`cue::marker_span`]); any other `[` is text and its words count.
    fn of(buffer: &str) -> Self {
        let mut scan = Self::default();
        let mut token_speakable = false;
        let mut skip_to = 0;
        let mut chars = buffer.char_indices().peekable();

        while let Some((idx, c)) = chars.next() {
            if idx < skip_to {
                continue;
            }

            let next = chars.peek().map(|&(_, n)| n);
            let followed_by_space = next.is_some_and(char::is_whitespace);
            let marker = if c == '[' {
                cue::marker_span(&buffer[idx..])
            } else {
                MarkerSpan::Literal
            };

            match marker {
                MarkerSpan::Closed(len) => {
                    scan.words += usize::from(std::mem::take(&mut token_speakable));
                    skip_to = idx + len;
                }
                // Nothing past a marker that may still close can be cut.
                MarkerSpan::Open => {
                    scan.words += usize::from(std::mem::take(&mut token_speakable));
                    return scan;
                }
                MarkerSpan::Literal if c.is_whitespace() => {
                    scan.words += usize::from(std::mem::take(&mut token_speakable));
                    scan.breaks.push(Break {
                        kind: BreakKind::Word,
                        end: idx,
                        words: scan.words,
                    });
                }
                MarkerSpan::Literal => {
                    token_speakable |= c.is_alphanumeric();
                    let kind = match c {
                        '.' | '!' | '?' if next.is_none() || followed_by_space => {
                            Some(BreakKind::Sentence)
                        }
                        ',' | ';' | ':' if followed_by_space => Some(BreakKind::Clause),
                        _ => None,
                    };
                    if let Some(kind) = kind {
                        scan.breaks.push(Break {
                            kind,
                            end: idx + c.len_utf8(),
                            words: scan.words + usize::from(token_speakable),
                        });
                    }
                }
            }
        }

        scan.words += usize::from(token_speakable);
        scan
    }

    fn last(&self, kind: BreakKind, max_words: usize) -> Option<&Break> {
        self.breaks
            .iter()
            .rfind(|b| b.kind == kind && b.words > 0 && b.words <= max_words)
    }
}

/// Accumulates streamed fragments and decides where units end.
#[derive(Debug)]
pub struct SentenceSegmenter {
    config: SegmentationConfig,
    buffer: String,
    /// Whether the first unit of the turn has been cut.
    first_emitted: bool,
}

impl SentenceSegmenter {
    #[must_use]
    pub const fn new(config: SegmentationConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            first_emitted: false,
        }
    }

    /// Append a fragment and return every unit that became ready.
    ///
    /// Whitespace-only fragments are kept (they may separate two words) but
    /// never trigger a cut.
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        if fragment.is_empty() {
            trace!("Segmentation no-op: empty fragment");
            return Vec::new();
        }
        self.buffer.push_str(fragment);
        if fragment.trim().is_empty() {
            trace!("Segmentation no-op: whitespace-only fragment");
            return Vec::new();
        }

        let mut ready = Vec::new();
        while let Some(cut) = self.next_cut() {
            let rest = self.buffer.split_off(cut);
            let unit = std::mem::replace(&mut self.buffer, rest);
            self.first_emitted = true;
            ready.push(unit.trim().to_string());
        }
        ready
    }

    /// Return whatever remains as a final unit.
    ///
    /// Returns `None` when the buffer is empty or whitespace, so calling it
    /// twice is harmless.
    pub fn flush(&mut self) -> Option<String> {
        let remainder = std::mem::take(&mut self.buffer);
        let remainder = remainder.trim();
        if remainder.is_empty() {
            None
        } else {
            self.first_emitted = true;
            Some(remainder.to_string())
        }
    }

    /// Forget buffered text and start the next turn in first-unit mode.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.first_emitted = false;
    }

    /// Text waiting for a cut point.
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    #[must_use]
    pub const fn is_first_unit(&self) -> bool {
        !self.first_emitted
    }

    fn next_cut(&self) -> Option<usize> {
        let scan = Scan::of(&self.buffer);
        let cfg = &self.config;

        let regular = if self.first_emitted {
            let sentences: Vec<&Break> = scan
                .breaks
                .iter()
                .filter(|b| b.kind == BreakKind::Sentence)
                .collect();
            sentences
                .last()
                .filter(|last| sentences.len() >= cfg.sentences_per_unit && last.words > 0)
                .map(|last| last.end)
        } else {
            let min_words = cfg.first_unit_min_words.max(1);
            scan.breaks
                .iter()
                .find(|b| {
                    let eligible = match b.kind {
                        BreakKind::Sentence => true,
                        BreakKind::Clause => cfg.first_unit_soft_breaks,
                        BreakKind::Word => false,
                    };
                    eligible && b.words >= min_words
                })
                .map(|b| b.end)
        };
        if regular.is_some() {
            return regular;
        }

        if scan.words > cfg.max_words_per_unit {
            let max = cfg.max_words_per_unit;
            let cut = scan
                .last(BreakKind::Sentence, max)
                .or_else(|| scan.last(BreakKind::Clause, max))
                .or_else(|| scan.last(BreakKind::Word, max))
                .map(|b| b.end);
            if cut.is_some() {
                trace!(
                    words = scan.words,
                    max_words = max,
                    "Cutting run-on text at word ceiling"
                );
            } else {
                trace!(words = scan.words, "Word ceiling exceeded but no cut point yet");
            }
            return cut;
        }

        None
    }
}
