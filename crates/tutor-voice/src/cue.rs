//! Avatar cue markers.
//!
//! The generator annotates its answers with bracketed markers such as
//! `[Happy]` or `[Thinking]`. Markers are never spoken: extraction removes
//! them from the unit's text and records the word offset at which each one
//! should fire, so the avatar changes expression right before that word is
//! heard.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::text;

/// Longest marker body, in characters. A `[` not closed within this many
/// characters is ordinary text.
pub const MAX_MARKER_BODY: usize = 32;

/// A complete `[...]` marker: a single line, never nested, body capped at
/// [`MAX_MARKER_BODY`]. Must agree with [`marker_span`].
static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\[[^\[\]\n]{{0,{MAX_MARKER_BODY}}}\]")).expect("marker regex is valid")
});

/// What a `[` opens, judged from the text that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerSpan {
    /// A complete marker of this many bytes, brackets included.
    Closed(usize),
    /// Could still become a marker once more text arrives.
    Open,
    /// Not a marker; the `[` is ordinary text.
    Literal,
}

/// Classify the `[` at the start of `rest`.
///
/// Used by the segmenter on a growing buffer, so running out of text before
/// the body cap is [`MarkerSpan::Open`] rather than literal.
#[must_use]
pub fn marker_span(rest: &str) -> MarkerSpan {
    if !rest.starts_with('[') {
        return MarkerSpan::Literal;
    }
    for (body_len, (idx, c)) in rest.char_indices().skip(1).enumerate() {
        match c {
            ']' => return MarkerSpan::Closed(idx + 1),
            '[' | '\n' => return MarkerSpan::Literal,
            _ if body_len >= MAX_MARKER_BODY => return MarkerSpan::Literal,
            _ => {}
        }
    }
    MarkerSpan::Open
}

/// Closed set of cues understood by the avatar rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CueTag {
    Happy,
    SuperHappy,
    Neutral,
    Thinking,
    Explaining,
    Surprised,
    Encouraging,
}

impl CueTag {
    pub const ALL: [Self; 7] = [
        Self::Happy,
        Self::SuperHappy,
        Self::Neutral,
        Self::Thinking,
        Self::Explaining,
        Self::Surprised,
        Self::Encouraging,
    ];

    /// Resolve a marker body (the text between the brackets).
    ///
    /// Matching ignores case and surrounding whitespace.
    #[must_use]
    pub fn parse(body: &str) -> Option<Self> {
        let body = body.trim();
        Self::ALL
            .into_iter()
            .find(|tag| tag.name().eq_ignore_ascii_case(body))
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Happy => "Happy",
            Self::SuperHappy => "SuperHappy",
            Self::Neutral => "Neutral",
            Self::Thinking => "Thinking",
            Self::Explaining => "Explaining",
            Self::Surprised => "Surprised",
            Self::Encouraging => "Encouraging",
        }
    }

    /// Expression state the avatar animator switches to for this cue.
    #[must_use]
    pub const fn expression(self) -> &'static str {
        match self {
            Self::Happy | Self::SuperHappy => "Happy",
            Self::Neutral => "Neutral",
            Self::Thinking => "Thinking",
            Self::Explaining => "Talking",
            Self::Surprised => "Surprised",
            Self::Encouraging => "Encouraging",
        }
    }
}

impl fmt::Display for CueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A cue that fires right before `word_index` is spoken.
///
/// `word_index == words.len()` fires after the last word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledCue {
    pub tag: CueTag,
    pub word_index: usize,
}

/// Result of running a raw unit through the extractor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedText {
    /// Words joined by single spaces.
    pub cleaned_text: String,
    pub words: Vec<String>,
    /// Ordered by `word_index`, then by position in the raw text.
    pub cues: Vec<ScheduledCue>,
}

/// Strip cue markers and decoration from a raw unit and schedule its cues.
///
/// A blank line between paragraphs becomes a sentence pause: the preceding
/// word gets a trailing `.` unless it already ends in punctuation. Markers
/// whose body is not a known [`CueTag`] are removed without a cue.
#[must_use]
pub fn extract(raw: &str) -> ExtractedText {
    let mut words: Vec<String> = Vec::new();
    let mut cues = Vec::new();
    let mut cursor = 0;

    for marker in MARKER.find_iter(raw) {
        push_words(&raw[cursor..marker.start()], &mut words);
        cursor = marker.end();

        let body = &raw[marker.start() + 1..marker.end() - 1];
        match CueTag::parse(body) {
            Some(tag) => cues.push(ScheduledCue {
                tag,
                word_index: words.len(),
            }),
            None => debug!(marker = marker.as_str(), "Dropping unknown cue marker"),
        }
    }
    push_words(&raw[cursor..], &mut words);

    ExtractedText {
        cleaned_text: words.join(" "),
        words,
        cues,
    }
}

fn push_words(part: &str, words: &mut Vec<String>) {
    for (i, paragraph) in text::paragraphs(part).enumerate() {
        if i > 0 {
            if let Some(last) = words.last_mut() {
                if !text::ends_with_pause(last) {
                    last.push('.');
                }
            }
        }
        words.extend(text::words(paragraph));
    }
}
