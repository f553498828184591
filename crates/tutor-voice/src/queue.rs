//! Ordered playback queue.
//!
//! Units play one at a time, strictly in the order they were enqueued.
//! Each unit carries its own [`PendingAudio`]; when the head unit is still
//! being synthesized the worker waits for it even if later units are ready.
//! That head-of-line blocking is what guarantees playback order.
//!
//! ```text
//!   Idle ──enqueue──▶ Playing ──queue empty──▶ Idle
//!                        │                       │ stream ended
//!                        └───────────────────────▶ Drained (once per turn)
//! ```
//!
//! The worker is an explicit loop over the queue. State lives behind a
//! `std::sync::Mutex` that is never held across an `.await`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::captions::{CaptionScheduler, build_timeline};
use crate::error::UnitFailure;
use crate::events::{EventEmitter, PipelineEvent};
use crate::gate::SpeakingGate;
use crate::playback::PlaybackSink;
use crate::synthesis::{AudioResult, PendingAudio};
use crate::unit::TextUnit;

/// Invoked once when a turn's queue drains after its stream ended.
pub type DrainCallback = Box<dyn FnOnce() + Send + 'static>;

/// A unit waiting for its turn to play.
#[derive(Debug)]
pub struct QueuedUnit {
    pub unit: TextUnit,
    pub audio: PendingAudio,
}

struct QueueState {
    units: VecDeque<QueuedUnit>,
    /// A worker task is running for this generation.
    is_playing: bool,
    /// Whether `TalkingChanged { talking: true }` is in effect.
    talking: bool,
    stream_ended: bool,
    drained_fired: bool,
    on_drained: Option<DrainCallback>,
    generation: u64,
    turn: CancellationToken,
}

struct QueueInner {
    state: Mutex<QueueState>,
    sink: Arc<dyn PlaybackSink>,
    emitter: EventEmitter,
    scheduler: CaptionScheduler,
    gate: SpeakingGate,
    caption_max_words: usize,
    runtime: Handle,
}

/// FIFO of units with one playback worker per active turn.
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct PlaybackQueue {
    inner: Arc<QueueInner>,
}

impl PlaybackQueue {
    pub fn new(
        sink: Arc<dyn PlaybackSink>,
        emitter: EventEmitter,
        gate: SpeakingGate,
        caption_max_words: usize,
        runtime: Handle,
        turn: CancellationToken,
    ) -> Self {
        let generation = emitter.generation();
        let scheduler = CaptionScheduler::new(emitter.clone(), runtime.clone());
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    units: VecDeque::new(),
                    is_playing: false,
                    talking: false,
                    stream_ended: false,
                    drained_fired: false,
                    on_drained: None,
                    generation,
                    turn,
                }),
                sink,
                emitter,
                scheduler,
                gate,
                caption_max_words,
                runtime,
            }),
        }
    }

    /// Append a unit; start the worker if the queue was idle.
    pub fn enqueue(&self, unit: TextUnit, audio: PendingAudio) {
        let start = {
            let mut state = self.inner.lock();
            state.units.push_back(QueuedUnit { unit, audio });
            if state.is_playing {
                None
            } else {
                state.is_playing = true;
                Some((state.generation, state.turn.clone()))
            }
        };

        if let Some((generation, turn)) = start {
            debug!(generation, "Starting playback worker");
            let inner = Arc::clone(&self.inner);
            self.inner
                .runtime
                .spawn(async move { inner.run_worker(generation, turn).await });
        }
    }

    /// No more units will arrive in turn `generation`.
    ///
    /// Fires the drain right away if nothing is queued or playing. Ignored
    /// when the turn has already been stopped.
    pub fn mark_stream_ended(&self, generation: u64) {
        let callback = {
            let mut state = self.inner.lock();
            if state.generation != generation {
                return;
            }
            state.stream_ended = true;
            if !state.is_playing && state.units.is_empty() && !state.drained_fired {
                Some(self.inner.fire_drain(&mut state))
            } else {
                None
            }
        };
        run_callback(callback.flatten());
    }

    /// Register the drain callback, replacing any previous one.
    ///
    /// If this turn already drained the callback runs immediately.
    pub fn set_on_drained(&self, callback: DrainCallback) {
        let immediate = {
            let mut state = self.inner.lock();
            if state.drained_fired {
                Some(callback)
            } else {
                state.on_drained = Some(callback);
                None
            }
        };
        run_callback(immediate);
    }

    /// End the current turn: empty the queue, silence the sink, and fence
    /// off the turn's events. Returns the new turn generation.
    ///
    /// The caller must already have cancelled the old turn token.
    pub fn stop_turn(&self, next_turn: CancellationToken) -> u64 {
        let (dropped, generation) = {
            let mut state = self.inner.lock();
            let mut fence = vec![PipelineEvent::CaptionCleared];
            if std::mem::take(&mut state.talking) {
                fence.push(PipelineEvent::TalkingChanged { talking: false });
            }
            fence.push(PipelineEvent::Stopped);

            let generation = self.inner.emitter.advance(fence);
            state.generation = generation;
            state.turn = next_turn;
            state.is_playing = false;
            state.stream_ended = false;
            state.drained_fired = false;
            state.on_drained = None;
            (std::mem::take(&mut state.units), generation)
        };

        self.inner.gate.stop_speaking();
        self.inner.sink.stop();
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "Discarded queued units");
        }
        // Dropping the handles aborts their synthesis requests.
        drop(dropped);
        generation
    }

    /// Swap the turn token of a turn that never queued anything, dropping its
    /// drain callback. Emits nothing and keeps the generation.
    ///
    /// The caller must already have cancelled the old turn token.
    pub fn renew_turn(&self, next_turn: CancellationToken) {
        let mut state = self.inner.lock();
        state.turn = next_turn;
        state.on_drained = None;
    }

    /// Units waiting to play (the playing unit is not counted).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().units.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a worker is active for the current turn.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.inner.lock().is_playing
    }

    /// Whether the current turn already drained.
    #[must_use]
    pub fn has_drained(&self) -> bool {
        self.inner.lock().drained_fired
    }
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_worker(&self, generation: u64, turn: CancellationToken) {
        loop {
            let next = {
                let mut state = self.lock();
                if turn.is_cancelled() || state.generation != generation {
                    return;
                }
                if let Some(next) = state.units.pop_front() {
                    next
                } else {
                    state.is_playing = false;
                    self.go_idle(&mut state);
                    let callback = if state.stream_ended && !state.drained_fired {
                        self.fire_drain(&mut state)
                    } else {
                        None
                    };
                    drop(state);
                    run_callback(callback);
                    debug!(generation, "Playback worker idle");
                    return;
                }
            };
            self.play_unit(next, generation, &turn).await;
        }
    }

    async fn play_unit(&self, queued: QueuedUnit, generation: u64, turn: &CancellationToken) {
        let QueuedUnit { unit, mut audio } = queued;

        // Head-of-line: wait for this unit even if later ones are ready.
        let result = tokio::select! {
            biased;
            () = turn.cancelled() => return,
            result = audio.wait() => result,
        };
        let decoded = match result {
            AudioResult::Ready(decoded) => decoded,
            AudioResult::Failed(failure) => {
                self.skip(&unit, generation, failure);
                return;
            }
        };

        let duration = decoded.duration;
        let completion = {
            let mut state = self.lock();
            if turn.is_cancelled() || state.generation != generation {
                return;
            }
            match self.sink.play(decoded) {
                Ok(completion) => {
                    if !state.talking {
                        state.talking = true;
                        self.gate.start_speaking();
                        self.emitter
                            .emit_for(generation, PipelineEvent::TalkingChanged { talking: true });
                    }
                    self.emitter.emit_for(
                        generation,
                        PipelineEvent::UnitStarted {
                            id: unit.id,
                            duration,
                        },
                    );
                    completion
                }
                Err(e) => {
                    drop(state);
                    self.skip(&unit, generation, UnitFailure::from_playback(&e));
                    return;
                }
            }
        };
        debug!(unit = %unit.id, duration_ms = duration.as_millis(), "Unit playing");

        let captions = turn.child_token();
        let timeline = build_timeline(&unit.words, &unit.cues, duration, self.caption_max_words);
        self.scheduler
            .schedule(unit.id, generation, timeline, captions.clone());

        let finished = tokio::select! {
            biased;
            () = turn.cancelled() => {
                captions.cancel();
                return;
            }
            finished = completion.finished() => finished,
        };
        match finished {
            Ok(()) => {
                self.emitter
                    .emit_for(generation, PipelineEvent::UnitFinished { id: unit.id });
            }
            Err(e) => {
                captions.cancel();
                self.skip(&unit, generation, UnitFailure::from_playback(&e));
            }
        }
    }

    fn skip(&self, unit: &TextUnit, generation: u64, reason: UnitFailure) {
        if reason.is_cancellation() {
            debug!(unit = %unit.id, "Unit cancelled");
        } else {
            warn!(unit = %unit.id, %reason, "Skipping unit");
        }
        self.emitter
            .emit_for(generation, PipelineEvent::UnitSkipped { id: unit.id, reason });
    }

    /// Lower the talking state once nothing is left to play.
    fn go_idle(&self, state: &mut QueueState) {
        if std::mem::take(&mut state.talking) {
            self.gate.stop_speaking();
            self.emitter.emit_for(
                state.generation,
                PipelineEvent::TalkingChanged { talking: false },
            );
        }
    }

    /// Emit the drain events and hand back the callback to run unlocked.
    fn fire_drain(&self, state: &mut QueueState) -> Option<DrainCallback> {
        state.drained_fired = true;
        debug!(generation = state.generation, "Playback queue drained");
        self.emitter
            .emit_for(state.generation, PipelineEvent::CaptionCleared);
        self.emitter
            .emit_for(state.generation, PipelineEvent::Drained);
        state.on_drained.take()
    }
}

fn run_callback(callback: Option<DrainCallback>) {
    if let Some(callback) = callback {
        callback();
    }
}
