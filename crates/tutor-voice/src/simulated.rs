//! Clock-driven stand-ins for the synthesis endpoint and the audio device.
//!
//! [`SimulatedSink`] plays nothing: each unit just occupies the sink for its
//! probed duration on the Tokio clock. [`SilentSynthesizer`] answers every
//! request with silence sized to the text. With a paused test clock the whole
//! pipeline runs deterministically; the CLI uses both for `--dry-run`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::audio::DecodedAudio;
use crate::config::SynthesisParams;
use crate::error::VoiceError;
use crate::playback::{PlaybackCompletion, PlaybackSink};
use crate::synthesis::Synthesizer;
use crate::text;

const SILENCE_SAMPLE_RATE: u32 = 16_000;

// ── Synthesizer ────────────────────────────────────────────────────

/// A [`Synthesizer`] that returns silence instead of speech.
///
/// Each word lasts `per_word` at speed 1.0; faster speeds shorten it.
#[derive(Debug, Clone, Copy)]
pub struct SilentSynthesizer {
    per_word: Duration,
}

impl SilentSynthesizer {
    #[must_use]
    pub const fn new(per_word: Duration) -> Self {
        Self { per_word }
    }
}

impl Default for SilentSynthesizer {
    fn default() -> Self {
        Self::new(Duration::from_millis(350))
    }
}

#[async_trait]
impl Synthesizer for SilentSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        params: &SynthesisParams,
    ) -> Result<DecodedAudio, VoiceError> {
        let words = u32::try_from(text::words(text).count()).unwrap_or(u32::MAX);
        let duration = (self.per_word * words).div_f32(params.clamped_speed());
        Ok(DecodedAudio::silence(duration, SILENCE_SAMPLE_RATE))
    }
}

// ── Sink ───────────────────────────────────────────────────────────

/// A [`PlaybackSink`] that waits out each unit's duration.
#[derive(Debug)]
pub struct SimulatedSink {
    runtime: Handle,
    current: Mutex<Option<CancellationToken>>,
    started: Mutex<Vec<Duration>>,
    stops: AtomicUsize,
    /// Units still occupying the sink.
    active: Arc<AtomicUsize>,
}

impl SimulatedSink {
    /// Create a sink bound to the current Tokio runtime.
    pub fn new() -> Result<Self, VoiceError> {
        let runtime = Handle::try_current().map_err(|_| VoiceError::NoRuntime)?;
        Ok(Self {
            runtime,
            current: Mutex::new(None),
            started: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Durations of every unit started so far, in start order.
    #[must_use]
    pub fn started(&self) -> Vec<Duration> {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn play_count(&self) -> usize {
        self.started.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// How many times `stop()` interrupted a playing unit.
    #[must_use]
    pub fn interruptions(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.active.load(Ordering::SeqCst) > 0
    }

    fn interrupt_current(&self) {
        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = previous {
            if !token.is_cancelled() {
                token.cancel();
                self.stops.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

impl PlaybackSink for SimulatedSink {
    fn play(&self, audio: DecodedAudio) -> Result<PlaybackCompletion, VoiceError> {
        self.interrupt_current();

        let token = CancellationToken::new();
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(audio.duration);

        let (done, completion) = PlaybackCompletion::channel();
        let duration = audio.duration;
        let active = Arc::clone(&self.active);
        active.fetch_add(1, Ordering::SeqCst);

        self.runtime.spawn(async move {
            tokio::select! {
                () = token.cancelled() => drop(done),
                () = tokio::time::sleep(duration) => {
                    token.cancel();
                    done.complete();
                }
            }
            active.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(completion)
    }

    fn stop(&self) {
        self.interrupt_current();
    }
}
