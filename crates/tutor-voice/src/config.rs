//! Pipeline configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! overrides:
//!
//! ```json
//! { "segmentation": { "sentences_per_unit": 2 }, "synthesis": { "voice": "nova" } }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::VoiceError;

/// Slowest and fastest speaking rate the synthesis endpoint accepts.
pub const SPEED_RANGE: (f32, f32) = (0.25, 5.0);

// ── Segmentation ───────────────────────────────────────────────────

/// Cut-point thresholds for the sentence segmenter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Words required before the first unit of a turn may be cut.
    pub first_unit_min_words: usize,

    /// Let the first unit end at `,` `;` `:` as well as at sentence ends.
    pub first_unit_soft_breaks: bool,

    /// Terminated sentences required before any later unit is cut.
    pub sentences_per_unit: usize,

    /// Word ceiling after which the buffer is cut without a terminator.
    pub max_words_per_unit: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            first_unit_min_words: 1,
            first_unit_soft_breaks: true,
            sentences_per_unit: 3,
            max_words_per_unit: 25,
        }
    }
}

// ── Synthesis ──────────────────────────────────────────────────────

/// Voice parameters sent with every synthesis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisParams {
    /// Voice identifier understood by the endpoint (e.g. `"alvaro"`).
    pub voice: String,

    /// Speaking-rate multiplier.
    pub speed: f32,

    /// Pitch shift in the endpoint's notation (e.g. `"+0Hz"`).
    pub pitch: String,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            voice: "alvaro".to_string(),
            speed: 1.2,
            pitch: "+0Hz".to_string(),
        }
    }
}

impl SynthesisParams {
    /// Speed clamped to what the endpoint accepts.
    #[must_use]
    pub fn clamped_speed(&self) -> f32 {
        self.speed.clamp(SPEED_RANGE.0, SPEED_RANGE.1)
    }
}

// ── Pipeline ───────────────────────────────────────────────────────

/// Configuration for the speech pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub segmentation: SegmentationConfig,

    pub synthesis: SynthesisParams,

    /// Synthesis requests allowed in flight at once.
    pub max_concurrent_synthesis: usize,

    /// Maximum words shown on one caption line.
    pub caption_max_words: usize,

    /// How long `feed()` keeps ignoring text after `stop()`.
    pub abort_grace_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            segmentation: SegmentationConfig::default(),
            synthesis: SynthesisParams::default(),
            max_concurrent_synthesis: 3,
            caption_max_words: 14,
            abort_grace_ms: 50,
        }
    }
}

impl PipelineConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, VoiceError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), VoiceError> {
        let seg = &self.segmentation;
        if seg.first_unit_min_words == 0 {
            return Err(invalid("segmentation.first_unit_min_words must be at least 1"));
        }
        if seg.sentences_per_unit == 0 {
            return Err(invalid("segmentation.sentences_per_unit must be at least 1"));
        }
        if seg.max_words_per_unit == 0 {
            return Err(invalid("segmentation.max_words_per_unit must be at least 1"));
        }
        if self.max_concurrent_synthesis == 0 {
            return Err(invalid("max_concurrent_synthesis must be at least 1"));
        }
        if self.caption_max_words == 0 {
            return Err(invalid("caption_max_words must be at least 1"));
        }
        if !self.synthesis.speed.is_finite() || self.synthesis.speed <= 0.0 {
            return Err(invalid("synthesis.speed must be a positive number"));
        }
        if self.synthesis.voice.trim().is_empty() {
            return Err(invalid("synthesis.voice must not be empty"));
        }
        Ok(())
    }

    #[must_use]
    pub const fn abort_grace(&self) -> Duration {
        Duration::from_millis(self.abort_grace_ms)
    }
}

fn invalid(reason: &str) -> VoiceError {
    VoiceError::InvalidConfig(reason.to_string())
}
