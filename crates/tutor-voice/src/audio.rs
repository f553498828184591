//! Decoded audio and duration probing.
//!
//! The synthesis endpoint never declares how long its audio lasts. Captions
//! and cues are timed against the duration probed here from the decoded
//! sample count, not estimated from text length.

use std::io::Cursor;
use std::time::Duration;

use rodio::Source;

use crate::error::VoiceError;

/// PCM audio ready for a playback sink.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Interleaved f32 samples.
    pub samples: Vec<f32>,

    pub sample_rate: u32,

    pub channels: u16,

    /// Probed from `samples.len()`, `sample_rate` and `channels`.
    pub duration: Duration,
}

impl DecodedAudio {
    /// Wrap samples and probe their duration.
    #[must_use]
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        let duration = probe_duration(samples.len(), sample_rate, channels);
        Self {
            samples,
            sample_rate,
            channels,
            duration,
        }
    }

    /// Mono silence of the given length. Handy for simulated playback.
    #[must_use]
    pub fn silence(duration: Duration, sample_rate: u32) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let frames = (duration.as_secs_f64() * f64::from(sample_rate)).round() as usize;
        Self::new(vec![0.0; frames], sample_rate, 1)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Playback length of `sample_count` interleaved samples.
#[must_use]
pub fn probe_duration(sample_count: usize, sample_rate: u32, channels: u16) -> Duration {
    if sample_rate == 0 || channels == 0 {
        return Duration::ZERO;
    }
    let frames = (sample_count / usize::from(channels)) as u128;
    let nanos = frames * 1_000_000_000 / u128::from(sample_rate);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Decode an encoded audio asset (WAV or MP3) into f32 samples.
///
/// This is CPU-bound; async callers run it on a blocking thread.
pub fn decode(bytes: Vec<u8>) -> Result<DecodedAudio, VoiceError> {
    if bytes.is_empty() {
        return Err(VoiceError::DecodeError("empty audio body".to_string()));
    }

    let decoder = rodio::Decoder::new(Cursor::new(bytes))
        .map_err(|e| VoiceError::DecodeError(e.to_string()))?;
    let sample_rate = decoder.sample_rate();
    let channels = decoder.channels();
    let samples: Vec<f32> = decoder.convert_samples().collect();

    if samples.is_empty() {
        return Err(VoiceError::DecodeError("audio contains no samples".to_string()));
    }

    let audio = DecodedAudio::new(samples, sample_rate, channels);
    tracing::trace!(
        sample_rate,
        channels,
        duration_ms = audio.duration.as_millis(),
        "Decoded synthesized audio"
    );
    Ok(audio)
}
