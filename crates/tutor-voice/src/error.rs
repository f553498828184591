//! Speech pipeline error types.

use std::fmt;

/// Errors that can occur in the speech pipeline.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// The pipeline was created outside of a Tokio runtime.
    #[error("Speech pipeline must be created inside a Tokio runtime")]
    NoRuntime,

    /// A configuration value is out of range.
    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// Config file could not be parsed.
    #[error("Invalid pipeline config file: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Text was fed after the stream was already completed for this turn.
    #[error("Text stream already completed for this turn; call reset() to start a new one")]
    TurnFinished,

    /// Failed to synthesize speech.
    #[error("Speech synthesis failed: {0}")]
    SynthesisError(String),

    /// The synthesis endpoint answered with a non-success status.
    #[error("Synthesis endpoint returned HTTP {status}: {body}")]
    SynthesisHttp { status: u16, body: String },

    /// The synthesized audio could not be decoded.
    #[error("Failed to decode synthesized audio: {0}")]
    DecodeError(String),

    /// Failed to open audio output stream.
    #[error("Failed to open audio output stream: {0}")]
    OutputStreamError(String),

    /// Audio device error while playing a unit.
    #[error("Audio playback failed: {0}")]
    PlaybackError(String),

    /// The dedicated audio thread has exited.
    #[error("Audio thread is no longer running")]
    AudioThreadDied,

    /// Operation was cancelled by `stop()`.
    #[error("Speech operation cancelled")]
    Cancelled,

    /// Transport error talking to the synthesis endpoint.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error (config files, stdin).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceError {
    /// Whether this error is the expected result of a cancellation.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Why a unit produced no audio.
///
/// Every per-unit failure is absorbed by the playback queue: the unit is
/// skipped and the turn continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitFailure {
    /// The synthesis request failed (network, endpoint, decode).
    Synthesis(String),

    /// The audio device failed to start or finish the unit.
    Playback(String),

    /// The request was cancelled by `stop()`. Never user-visible.
    Cancelled,
}

impl UnitFailure {
    /// Classify an error raised while synthesizing a unit.
    #[must_use]
    pub fn from_synthesis(err: &VoiceError) -> Self {
        if err.is_cancellation() {
            Self::Cancelled
        } else {
            Self::Synthesis(err.to_string())
        }
    }

    /// Classify an error raised while playing a unit.
    #[must_use]
    pub fn from_playback(err: &VoiceError) -> Self {
        if err.is_cancellation() {
            Self::Cancelled
        } else {
            Self::Playback(err.to_string())
        }
    }

    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synthesis(reason) => write!(f, "synthesis failed: {reason}"),
            Self::Playback(reason) => write!(f, "playback failed: {reason}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}
