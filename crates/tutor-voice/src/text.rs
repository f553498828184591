//! Text normalization shared by the segmenter and the cue extractor.
//!
//! Streamed answers carry light markdown decoration and paragraph breaks.
//! Neither should be spoken, and a paragraph break should read as a pause.

use std::sync::LazyLock;

use regex::Regex;

/// Characters that decorate markdown output and are never spoken.
const DECORATION: &[char] = &['#', '*', '_', '~', '`', '>'];

/// Punctuation that already gives the synthesizer a pause.
const PAUSE_PUNCTUATION: &[char] = &['.', '!', '?', ',', ';', ':', '…'];

/// A blank line, tolerating trailing spaces and CRLF line endings.
static PARAGRAPH_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\r?\n[ \t]*\r?\n").expect("paragraph regex is valid")
});

/// Remove markdown decoration characters.
#[must_use]
pub fn strip_decoration(text: &str) -> String {
    text.chars().filter(|c| !DECORATION.contains(c)).collect()
}

/// Collapse whitespace runs into single spaces and trim the ends.
#[must_use]
pub fn collapse_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut prev_space = false;

    for c in text.chars() {
        if c.is_whitespace() {
            if !prev_space {
                result.push(' ');
                prev_space = true;
            }
        } else {
            result.push(c);
            prev_space = false;
        }
    }

    result.trim().to_string()
}

/// Split text into paragraphs at blank lines.
///
/// Returns at least one element; a text with no blank line is returned whole.
pub fn paragraphs(text: &str) -> impl Iterator<Item = &str> {
    PARAGRAPH_BREAK.split(text)
}

/// Undecorated word tokens of `text`.
///
/// Tokens made only of decoration (a lone `**`, a `>` quote marker)
/// disappear entirely.
pub fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace()
        .map(strip_decoration)
        .filter(|w| !w.is_empty())
}

/// Whether a word ends with punctuation that already reads as a pause.
#[must_use]
pub fn ends_with_pause(word: &str) -> bool {
    word.ends_with(PAUSE_PUNCTUATION)
}

/// Whether a token would actually be voiced.
///
/// Bare punctuation (`...`, `-`) is kept in captions but does not count as
/// a word when deciding whether a unit has anything to say.
#[must_use]
pub fn is_speakable(word: &str) -> bool {
    word.chars().any(char::is_alphanumeric)
}

/// Shorten text for log output without splitting a UTF-8 character.
#[must_use]
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
