//! Speakable text units.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cue::{self, ScheduledCue};
use crate::text;

/// Position of a unit in its turn's playback order.
///
/// Ids start at 0 for every turn and increase by one per unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId(pub u64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One segment of text sized for a single synthesis and playback cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextUnit {
    pub id: UnitId,

    /// Verbatim span cut by the segmenter, markers included.
    pub raw_text: String,

    /// What gets synthesized and captioned: `words` joined by spaces.
    pub cleaned_text: String,

    pub words: Vec<String>,

    pub cues: Vec<ScheduledCue>,
}

impl TextUnit {
    /// Run `raw_text` through the cue extractor.
    #[must_use]
    pub fn new(id: UnitId, raw_text: String) -> Self {
        let extracted = cue::extract(&raw_text);
        Self {
            id,
            raw_text,
            cleaned_text: extracted.cleaned_text,
            words: extracted.words,
            cues: extracted.cues,
        }
    }

    /// Whether extraction left nothing that would be voiced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.words.iter().any(|w| text::is_speakable(w))
    }
}
