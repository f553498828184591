//! Incremental speech playback for streamed tutor answers.
//!
//! Text arrives in fragments while the language model is still writing.
//! The pipeline cuts it into speakable units as early as it can, starts
//! synthesizing each unit right away (a few at a time), and plays the audio
//! strictly in order. While a unit plays, its inline `[Tag]` cues and caption
//! lines are emitted at the matching points of the audio.
//!
//! Start with [`SpeechPipeline`].
#![deny(unused_crate_dependencies)]

pub mod audio;
pub mod audio_local;
mod audio_thread;
pub mod backend;
pub mod captions;
pub mod config;
pub mod cue;
pub mod error;
pub mod events;
pub mod gate;
pub mod pipeline;
pub mod playback;
pub mod queue;
pub mod segmenter;
pub mod simulated;
pub mod synthesis;
pub mod text;
pub mod unit;

// Re-export key types for convenience
pub use audio::DecodedAudio;
pub use audio_local::RodioSink;
pub use backend::{HttpSynthesizer, HttpSynthesizerConfig};
pub use config::{PipelineConfig, SegmentationConfig, SynthesisParams};
pub use cue::{CueTag, ScheduledCue};
pub use error::{UnitFailure, VoiceError};
pub use events::PipelineEvent;
pub use gate::SpeakingGate;
pub use pipeline::SpeechPipeline;
pub use playback::{PlaybackCompletion, PlaybackSink};
pub use segmenter::SentenceSegmenter;
pub use simulated::{SilentSynthesizer, SimulatedSink};
pub use synthesis::{AudioResult, PendingAudio, Synthesizer};
pub use unit::{TextUnit, UnitId};
