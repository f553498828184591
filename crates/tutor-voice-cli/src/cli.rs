//! Command-line arguments.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tutor_voice::{HttpSynthesizerConfig, PipelineConfig};

/// How pipeline events are written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EventFormat {
    /// Caption lines and cue changes for humans.
    Captions,
    /// One JSON object per event.
    Json,
}

/// Speak a streamed tutor answer.
///
/// Text is read from stdin as it arrives (or taken from the TEXT argument),
/// synthesized unit by unit, and played in order while captions and avatar
/// cues are printed.
#[derive(Debug, Parser)]
#[command(name = "tutor-voice")]
#[command(about = "Speak streamed text with synced captions and avatar cues")]
#[command(version)]
pub struct Cli {
    /// Text to speak instead of reading stdin
    pub text: Option<String>,

    /// JSON pipeline config file
    #[arg(short = 'c', long, env = "TUTOR_VOICE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Synthesis endpoint URL
    #[arg(long, env = "TUTOR_TTS_URL", default_value = "http://127.0.0.1:8000/tts")]
    pub url: String,

    /// Voice identifier
    #[arg(long, env = "TUTOR_TTS_VOICE")]
    pub voice: Option<String>,

    /// Speaking rate (0.25 to 5.0)
    #[arg(long, env = "TUTOR_TTS_SPEED")]
    pub speed: Option<f32>,

    /// Pitch shift, e.g. "+0Hz"
    #[arg(long, allow_hyphen_values = true)]
    pub pitch: Option<String>,

    /// Per-request synthesis timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Run without the endpoint or an audio device (silent, real-time)
    #[arg(long)]
    pub dry_run: bool,

    /// Event output format
    #[arg(long, value_enum, default_value_t = EventFormat::Captions)]
    pub events: EventFormat,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Cli {
    /// The config file (or defaults) with command-line overrides applied.
    pub fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        if let Some(voice) = &self.voice {
            config.synthesis.voice.clone_from(voice);
        }
        if let Some(speed) = self.speed {
            config.synthesis.speed = speed;
        }
        if let Some(pitch) = &self.pitch {
            config.synthesis.pitch.clone_from(pitch);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn http_config(&self) -> HttpSynthesizerConfig {
        HttpSynthesizerConfig {
            endpoint: self.url.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}
