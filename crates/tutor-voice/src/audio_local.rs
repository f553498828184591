//! Local-speaker adapter for the [`PlaybackSink`] trait.
//!
//! [`RodioSink`] is a thin wrapper around [`AudioThreadHandle`]. Every
//! method on the handle takes `&self`, so the sink needs no lock of its own.

use crate::audio::DecodedAudio;
use crate::audio_thread::AudioThreadHandle;
use crate::error::VoiceError;
use crate::playback::{PlaybackCompletion, PlaybackSink};

/// Plays units on the default output device.
pub struct RodioSink {
    handle: AudioThreadHandle,
}

impl RodioSink {
    /// Spawn the audio thread and open the default output device.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError`] if the audio thread fails to start (e.g. no
    /// output device present).
    pub fn open() -> Result<Self, VoiceError> {
        Ok(Self {
            handle: AudioThreadHandle::spawn()?,
        })
    }
}

impl PlaybackSink for RodioSink {
    fn play(&self, audio: DecodedAudio) -> Result<PlaybackCompletion, VoiceError> {
        self.handle.play(audio)
    }

    fn stop(&self) {
        self.handle.stop();
    }
}
