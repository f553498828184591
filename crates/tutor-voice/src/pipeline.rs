//! Speech pipeline controller.
//!
//! [`SpeechPipeline`] ties the stages together for one conversation:
//!
//! ```text
//!   feed(fragment) ─▶ SentenceSegmenter ─▶ TextUnit (cues extracted)
//!                                              │
//!                         SynthesisRequester ◀─┤ (starts immediately)
//!                                              ▼
//!                                        PlaybackQueue ─▶ PlaybackSink
//!                                              │
//!                                              └─▶ captions / cues ─▶ events
//! ```
//!
//! A *turn* is one streamed response. It ends naturally when the queue
//! drains after [`SpeechPipeline::on_stream_complete`], or abruptly with
//! [`SpeechPipeline::stop`]. [`SpeechPipeline::reset`] starts a new one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{Stream, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::PipelineConfig;
use crate::error::VoiceError;
use crate::events::{EventEmitter, PipelineEvent};
use crate::gate::SpeakingGate;
use crate::playback::PlaybackSink;
use crate::queue::{DrainCallback, PlaybackQueue};
use crate::segmenter::SentenceSegmenter;
use crate::synthesis::{SynthesisRequester, Synthesizer};
use crate::unit::{TextUnit, UnitId};

// ── Turn state ─────────────────────────────────────────────────────

struct TurnState {
    segmenter: SentenceSegmenter,
    next_id: u64,
    generation: u64,
    turn: CancellationToken,
    /// Input is ignored until this deadline passes.
    aborted_until: Option<Instant>,
    stream_ended: bool,
    /// Nothing has happened since the last stop (or since creation).
    quiescent: bool,
}

impl TurnState {
    fn is_aborted(&self) -> bool {
        self.aborted_until
            .is_some_and(|deadline| Instant::now() < deadline)
    }
}

// ── Pipeline ───────────────────────────────────────────────────────

/// Streams text in, plays speech out, in order.
///
/// All methods take `&self`; wrap the pipeline in an `Arc` to share it
/// between the task feeding text and the task handling cancellation.
pub struct SpeechPipeline {
    config: PipelineConfig,
    state: Mutex<TurnState>,
    requester: SynthesisRequester,
    queue: PlaybackQueue,
    emitter: EventEmitter,
    gate: SpeakingGate,
}

impl SpeechPipeline {
    /// Create a pipeline and the receiver for its events.
    ///
    /// Must be called from within a Tokio runtime; background tasks are
    /// spawned onto it.
    pub fn new(
        config: PipelineConfig,
        synthesizer: Arc<dyn Synthesizer>,
        sink: Arc<dyn PlaybackSink>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PipelineEvent>), VoiceError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| VoiceError::NoRuntime)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = EventEmitter::new(tx);
        let gate = SpeakingGate::new();
        let turn = CancellationToken::new();

        let requester = SynthesisRequester::new(
            synthesizer,
            config.synthesis.clone(),
            config.max_concurrent_synthesis,
            &runtime,
        );
        let queue = PlaybackQueue::new(
            sink,
            emitter.clone(),
            gate.clone(),
            config.caption_max_words,
            runtime,
            turn.clone(),
        );

        let state = TurnState {
            segmenter: SentenceSegmenter::new(config.segmentation.clone()),
            next_id: 0,
            generation: emitter.generation(),
            turn,
            aborted_until: None,
            stream_ended: false,
            quiescent: true,
        };

        info!(
            voice = %config.synthesis.voice,
            max_concurrent = config.max_concurrent_synthesis,
            "Speech pipeline ready"
        );

        Ok((
            Self {
                config,
                state: Mutex::new(state),
                requester,
                queue,
                emitter,
                gate,
            },
            rx,
        ))
    }

    // ── Input ──────────────────────────────────────────────────────

    /// Feed the next streamed fragment.
    ///
    /// Returns the ids of units cut from it (often none). Fragments that
    /// arrive while the pipeline is aborted are dropped.
    ///
    /// # Errors
    ///
    /// [`VoiceError::TurnFinished`] after [`Self::on_stream_complete`] until
    /// the next [`Self::reset`] or [`Self::stop`].
    pub fn feed(&self, fragment: &str) -> Result<Vec<UnitId>, VoiceError> {
        let mut state = self.lock();
        if state.is_aborted() {
            trace!(len = fragment.len(), "Pipeline aborted; fragment dropped");
            return Ok(Vec::new());
        }
        if state.stream_ended {
            return Err(VoiceError::TurnFinished);
        }
        if fragment.is_empty() {
            return Ok(Vec::new());
        }

        state.quiescent = false;
        let ready = state.segmenter.push(fragment);
        Ok(ready
            .into_iter()
            .filter_map(|raw| self.dispatch(&mut state, raw))
            .collect())
    }

    /// Cut whatever text is still buffered into a final unit.
    ///
    /// # Errors
    ///
    /// [`VoiceError::TurnFinished`] after [`Self::on_stream_complete`].
    pub fn flush(&self) -> Result<Option<UnitId>, VoiceError> {
        let mut state = self.lock();
        if state.is_aborted() {
            return Ok(None);
        }
        if state.stream_ended {
            return Err(VoiceError::TurnFinished);
        }
        Ok(state
            .segmenter
            .flush()
            .and_then(|raw| self.dispatch(&mut state, raw)))
    }

    /// Mark the end of the input stream for this turn.
    ///
    /// Once the queue is empty the pipeline drains: `Drained` is emitted and
    /// the drain callback runs, exactly once per turn. If nothing is queued
    /// or playing that happens before this returns.
    pub fn on_stream_complete(&self) {
        let generation = {
            let mut state = self.lock();
            if state.is_aborted() || state.stream_ended {
                return;
            }
            state.stream_ended = true;
            state.quiescent = false;
            state.generation
        };
        debug!(generation, "Input stream complete");
        self.queue.mark_stream_ended(generation);
    }

    /// [`Self::flush`] followed by [`Self::on_stream_complete`].
    ///
    /// # Errors
    ///
    /// [`VoiceError::TurnFinished`] if the turn already finished.
    pub fn finish(&self) -> Result<Option<UnitId>, VoiceError> {
        let last = self.flush()?;
        self.on_stream_complete();
        Ok(last)
    }

    /// Feed a whole stream of fragments, finish the turn, and wait until
    /// every unit has played.
    ///
    /// # Errors
    ///
    /// [`VoiceError::Cancelled`] if the turn is stopped before it drains (or
    /// the pipeline is still aborted), [`VoiceError::TurnFinished`] if this
    /// turn was already finished.
    pub async fn speak_stream<S>(&self, fragments: S) -> Result<(), VoiceError>
    where
        S: Stream<Item = String>,
    {
        let turn = {
            let state = self.lock();
            if state.is_aborted() {
                return Err(VoiceError::Cancelled);
            }
            state.turn.clone()
        };
        let (drained_tx, drained_rx) = oneshot::channel();
        self.set_on_drained(move || {
            let _ = drained_tx.send(());
        });

        let mut fragments = std::pin::pin!(fragments);
        loop {
            let next = tokio::select! {
                biased;
                () = turn.cancelled() => return Err(VoiceError::Cancelled),
                next = fragments.next() => next,
            };
            let Some(fragment) = next else { break };
            self.feed(&fragment)?;
        }
        self.finish()?;

        tokio::select! {
            biased;
            () = turn.cancelled() => Err(VoiceError::Cancelled),
            drained = drained_rx => drained.map_err(|_| VoiceError::Cancelled),
        }
    }

    // ── Turn control ───────────────────────────────────────────────

    /// Abort the current turn.
    ///
    /// Cancels in-flight synthesis and caption timers, discards queued
    /// units, silences the sink and emits `Stopped`. No event from the
    /// stopped turn is delivered after this returns. Input is then ignored
    /// for the configured abort grace period. Calling it again is harmless.
    pub fn stop(&self) {
        let mut state = self.lock();
        state.aborted_until = Some(Instant::now() + self.config.abort_grace());
        if state.quiescent {
            // Still cancels a turn that is waiting for its first fragment.
            trace!("Stop on a quiescent pipeline");
            self.renew_turn(&mut state);
            return;
        }
        self.end_turn(&mut state);
        info!(generation = state.generation, "Speech turn stopped");
    }

    /// Start a fresh turn right away.
    ///
    /// Anything still running is stopped first; the abort grace period is
    /// cleared so the next `feed` is accepted immediately.
    pub fn reset(&self) {
        let mut state = self.lock();
        if state.quiescent {
            self.renew_turn(&mut state);
        } else {
            self.end_turn(&mut state);
        }
        state.aborted_until = None;
        debug!(generation = state.generation, "Speech turn reset");
    }

    /// Run `callback` once when the current turn drains.
    ///
    /// The callback belongs to the turn: `stop` and `reset` discard it. If
    /// the turn already drained it runs immediately.
    pub fn set_on_drained(&self, callback: impl FnOnce() + Send + 'static) {
        let callback: DrainCallback = Box::new(callback);
        self.queue.set_on_drained(callback);
    }

    // ── Accessors ──────────────────────────────────────────────────

    /// Whether a unit is playing or waiting to play.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.queue.is_playing()
    }

    /// Units waiting behind the one currently playing.
    #[must_use]
    pub fn queued_units(&self) -> usize {
        self.queue.len()
    }

    /// Whether input is currently being dropped after a `stop`.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.lock().is_aborted()
    }

    /// Generation of the current turn; bumped by every `stop`/`reset`.
    #[must_use]
    pub fn turn(&self) -> u64 {
        self.lock().generation
    }

    /// Shared flag raised while speech is audible.
    #[must_use]
    pub fn speaking_gate(&self) -> SpeakingGate {
        self.gate.clone()
    }

    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, TurnState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Turn a raw segment into a unit, request its audio and queue it.
    fn dispatch(&self, state: &mut TurnState, raw: String) -> Option<UnitId> {
        let id = UnitId(state.next_id);
        let unit = TextUnit::new(id, raw);
        if unit.is_empty() {
            debug!(raw = %unit.raw_text, "Dropping unit with no speakable words");
            return None;
        }
        state.next_id += 1;

        let audio = self
            .requester
            .request(id, &unit.cleaned_text, &state.turn);
        self.emitter.emit_for(
            state.generation,
            PipelineEvent::UnitQueued {
                id,
                text: unit.cleaned_text.clone(),
            },
        );
        self.queue.enqueue(unit, audio);
        Some(id)
    }

    /// Cancel a turn that has not started without emitting anything.
    fn renew_turn(&self, state: &mut TurnState) {
        state.turn.cancel();
        let next = CancellationToken::new();
        state.turn = next.clone();
        self.queue.renew_turn(next);
    }

    fn end_turn(&self, state: &mut TurnState) {
        state.turn.cancel();
        let next = CancellationToken::new();
        state.turn = next.clone();
        state.generation = self.queue.stop_turn(next);
        state.segmenter.reset();
        state.next_id = 0;
        state.stream_ended = false;
        state.quiescent = true;
    }
}

impl Drop for SpeechPipeline {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        // A drained turn has nothing left to tear down.
        if !state.quiescent && !self.queue.has_drained() {
            state.turn.cancel();
            self.queue.stop_turn(CancellationToken::new());
        }
    }
}
