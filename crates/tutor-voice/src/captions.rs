//! Caption and cue scheduling.
//!
//! Once a unit starts playing its duration is known. Words are spread
//! evenly across that duration: a cue fires at `word_index * time_per_word`
//! and each caption line is revealed at the offset of its first word.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cue::{CueTag, ScheduledCue};
use crate::events::{EventEmitter, PipelineEvent};
use crate::unit::UnitId;

/// Something to show at a point in a unit's playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEvent {
    Cue(CueTag),
    Caption(String),
}

impl TimelineEvent {
    const fn rank(&self) -> u8 {
        match self {
            Self::Cue(_) => 0,
            Self::Caption(_) => 1,
        }
    }

    fn into_event(self, id: UnitId) -> PipelineEvent {
        match self {
            Self::Cue(tag) => PipelineEvent::Cue { id, tag },
            Self::Caption(text) => PipelineEvent::Caption { id, text },
        }
    }
}

/// A timeline entry, relative to playback start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedEvent {
    pub offset: Duration,
    pub event: TimelineEvent,
}

/// Lay out a unit's cues and caption lines over `duration`.
///
/// Entries are ordered by offset; at equal offsets cues come before
/// captions so the avatar changes expression before the line appears.
/// Cue indices past the last word are clamped to the end of the unit.
#[must_use]
pub fn build_timeline(
    words: &[String],
    cues: &[ScheduledCue],
    duration: Duration,
    caption_max_words: usize,
) -> Vec<TimedEvent> {
    let word_count = words.len();
    #[allow(clippy::cast_precision_loss)]
    let offset_of = |index: usize| {
        if word_count == 0 {
            return Duration::ZERO;
        }
        let fraction = index.min(word_count) as f64 / word_count as f64;
        duration.mul_f64(fraction).min(duration)
    };

    let mut timeline: Vec<TimedEvent> = cues
        .iter()
        .map(|cue| TimedEvent {
            offset: offset_of(cue.word_index),
            event: TimelineEvent::Cue(cue.tag),
        })
        .collect();

    let group = caption_max_words.max(1);
    timeline.extend(words.chunks(group).enumerate().map(|(i, line)| TimedEvent {
        offset: offset_of(i * group),
        event: TimelineEvent::Caption(line.join(" ")),
    }));

    timeline.sort_by_key(|e| (e.offset, e.event.rank()));
    timeline
}

/// Emits a unit's timeline while it plays.
#[derive(Debug, Clone)]
pub struct CaptionScheduler {
    emitter: EventEmitter,
    runtime: Handle,
}

impl CaptionScheduler {
    #[must_use]
    pub const fn new(emitter: EventEmitter, runtime: Handle) -> Self {
        Self { emitter, runtime }
    }

    /// Emit `timeline` for unit `id`, starting now.
    ///
    /// Entries at offset zero are emitted before this returns. The rest run
    /// on a timer task that stops when `token` is cancelled or the turn
    /// generation moves on. Returns the task handle, if one was needed.
    pub fn schedule(
        &self,
        id: UnitId,
        generation: u64,
        timeline: Vec<TimedEvent>,
        token: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let start = tokio::time::Instant::now();
        let mut entries = timeline.into_iter().peekable();

        while let Some(timed) = entries.next_if(|e| e.offset.is_zero()) {
            if !self.emitter.emit_for(generation, timed.event.into_event(id)) {
                return None;
            }
        }

        let remaining: Vec<TimedEvent> = entries.collect();
        if remaining.is_empty() || token.is_cancelled() {
            return None;
        }

        let emitter = self.emitter.clone();
        Some(self.runtime.spawn(async move {
            for timed in remaining {
                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        tracing::trace!(unit = %id, "Caption timer cancelled");
                        return;
                    }
                    () = tokio::time::sleep_until(start + timed.offset) => {}
                }
                if !emitter.emit_for(generation, timed.event.into_event(id)) {
                    return;
                }
            }
        }))
    }
}
