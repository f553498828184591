//! Audio playback — the sink trait and the local `rodio` player.
//!
//! The playback queue only talks to [`PlaybackSink`]. A sink starts one
//! unit at a time and reports the end of that unit through a
//! [`PlaybackCompletion`]:
//!
//! | Implementor | Where used |
//! |---|---|
//! | [`RodioSink`](crate::audio_local::RodioSink) | CLI: default output device on a dedicated audio thread |
//! | [`SimulatedSink`](crate::simulated::SimulatedSink) | Tests and `--dry-run`: waits out the unit's duration on the Tokio clock |

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rodio::{OutputStream, OutputStreamHandle, Sink};
use tokio::sync::oneshot;

use crate::audio::DecodedAudio;
use crate::error::VoiceError;

// ── Sink trait ─────────────────────────────────────────────────────

/// Abstraction over an audio output (unit playback).
///
/// All methods take `&self` so the trait is object-safe and can be shared
/// as `Arc<dyn PlaybackSink>`; implementations use interior mutability.
pub trait PlaybackSink: Send + Sync {
    /// Start playing `audio`, replacing anything still playing.
    ///
    /// Returns once playback has started. The completion resolves when the
    /// audio ends, fails, or is interrupted by [`stop`](Self::stop).
    fn play(&self, audio: DecodedAudio) -> Result<PlaybackCompletion, VoiceError>;

    /// Halt current playback immediately. Idempotent.
    fn stop(&self);
}

// ── Completion ─────────────────────────────────────────────────────

/// Resolves when a started unit stops making sound.
#[derive(Debug)]
pub struct PlaybackCompletion {
    rx: oneshot::Receiver<Result<(), VoiceError>>,
}

/// Sending half of a [`PlaybackCompletion`], held by the sink.
///
/// Dropping it without reporting counts as an interruption.
#[derive(Debug)]
pub struct PlaybackDone {
    tx: oneshot::Sender<Result<(), VoiceError>>,
}

impl PlaybackCompletion {
    #[must_use]
    pub fn channel() -> (PlaybackDone, Self) {
        let (tx, rx) = oneshot::channel();
        (PlaybackDone { tx }, Self { rx })
    }

    /// Wait for the unit to end.
    ///
    /// `Err(VoiceError::Cancelled)` means playback was interrupted.
    pub async fn finished(self) -> Result<(), VoiceError> {
        self.rx.await.unwrap_or(Err(VoiceError::Cancelled))
    }
}

impl PlaybackDone {
    /// The audio played to the end.
    pub fn complete(self) {
        let _ = self.tx.send(Ok(()));
    }

    /// The device failed mid-unit.
    pub fn fail(self, err: VoiceError) {
        let _ = self.tx.send(Err(err));
    }
}

// ── rodio player ───────────────────────────────────────────────────

/// Plays decoded units on the default output device via `rodio`.
///
/// `rodio::OutputStream` is `!Send` on some platforms, so this type lives on
/// the audio thread owned by
/// [`AudioThreadHandle`](crate::audio_thread::AudioThreadHandle).
pub struct AudioPlayback {
    /// rodio output stream (must be kept alive).
    _stream: OutputStream,

    /// Handle used to create sinks.
    stream_handle: OutputStreamHandle,

    /// Sink of the unit currently playing (if any).
    sink: Option<Arc<Sink>>,

    /// Set by [`stop`](Self::stop) so the watcher of the interrupted unit
    /// reports an interruption instead of a natural end.
    interrupted: Arc<AtomicBool>,
}

impl AudioPlayback {
    /// Open the default output device.
    pub fn new() -> Result<Self, VoiceError> {
        let (stream, stream_handle) = OutputStream::try_default()
            .map_err(|e| VoiceError::OutputStreamError(e.to_string()))?;

        tracing::info!("Audio playback initialized on default output device");

        Ok(Self {
            _stream: stream,
            stream_handle,
            sink: None,
            interrupted: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Start `audio` on a fresh sink and report its end through `done`.
    pub fn play(&mut self, audio: DecodedAudio, done: PlaybackDone) -> Result<(), VoiceError> {
        self.stop();

        let sink = Sink::try_new(&self.stream_handle)
            .map_err(|e| VoiceError::OutputStreamError(e.to_string()))?;
        let source = rodio::buffer::SamplesBuffer::new(audio.channels, audio.sample_rate, audio.samples);
        sink.append(source);

        let sink = Arc::new(sink);
        let interrupted = Arc::new(AtomicBool::new(false));
        Self::spawn_completion_watcher(Arc::clone(&sink), Arc::clone(&interrupted), done)?;

        self.sink = Some(sink);
        self.interrupted = interrupted;

        tracing::debug!(
            sample_rate = audio.sample_rate,
            duration_ms = audio.duration.as_millis(),
            "Audio playback started"
        );
        Ok(())
    }

    /// Block a helper thread on the sink until it drains or is stopped.
    fn spawn_completion_watcher(
        sink: Arc<Sink>,
        interrupted: Arc<AtomicBool>,
        done: PlaybackDone,
    ) -> Result<(), VoiceError> {
        // `sleep_until_end()` returns early when `stop()` drops the queued
        // sources.
        std::thread::Builder::new()
            .name("tutor-voice-playback".into())
            .spawn(move || {
                sink.sleep_until_end();
                if interrupted.load(Ordering::SeqCst) {
                    // Dropping `done` reports the interruption.
                    return;
                }
                tracing::trace!("Playback finished naturally");
                done.complete();
            })
            .map(|_| ())
            .map_err(|e| VoiceError::PlaybackError(format!("failed to spawn playback watcher: {e}")))
    }

    /// Stop any active playback immediately.
    pub fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            self.interrupted.store(true, Ordering::SeqCst);
            sink.stop();
            tracing::debug!("Audio playback stopped");
        }
    }
}
