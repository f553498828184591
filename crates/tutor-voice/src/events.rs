//! Pipeline events and the turn-fenced emitter.
//!
//! Captions, cues and talking-state changes reach the avatar/caption layer
//! as [`PipelineEvent`]s on an unbounded channel. The consumer is purely
//! observational; nothing it does slows the pipeline down.
//!
//! Every emission names the turn generation it belongs to. `stop()` bumps
//! the generation under the same lock, so once it returns no event from the
//! stopped turn can reach the channel.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::cue::CueTag;
use crate::error::UnitFailure;
use crate::unit::UnitId;

/// Events emitted by the speech pipeline to the UI / avatar layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A unit was cut and its synthesis requested.
    UnitQueued { id: UnitId, text: String },

    /// A unit started playing.
    UnitStarted { id: UnitId, duration: Duration },

    /// Switch the avatar's expression.
    Cue { id: UnitId, tag: CueTag },

    /// Show a caption line (replaces the previous one).
    Caption { id: UnitId, text: String },

    /// Clear the caption line.
    CaptionCleared,

    /// A unit produced no audio and was skipped.
    UnitSkipped {
        id: UnitId,
        #[serde(serialize_with = "serialize_display")]
        reason: UnitFailure,
    },

    /// A unit finished playing.
    UnitFinished { id: UnitId },

    /// The avatar's mouth/talking state changed.
    TalkingChanged { talking: bool },

    /// The queue emptied after the stream ended. Fires once per turn.
    Drained,

    /// The turn was stopped. Nothing from it follows this event.
    Stopped,
}

fn serialize_display<S: serde::Serializer>(
    value: &UnitFailure,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Sends [`PipelineEvent`]s fenced by turn generation.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<PipelineEvent>,
    generation: Arc<Mutex<u64>>,
}

impl EventEmitter {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        Self {
            tx,
            generation: Arc::new(Mutex::new(0)),
        }
    }

    /// Current turn generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        *self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Emit `event` if turn `generation` is still current.
    ///
    /// Returns `false` when the turn is stale; the event is dropped.
    pub fn emit_for(&self, generation: u64, event: PipelineEvent) -> bool {
        let current = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != generation {
            tracing::trace!(generation, current = *current, ?event, "Dropping stale event");
            return false;
        }
        self.send(event);
        true
    }

    /// Start a new generation, emitting `fence` as the last events of the
    /// old one. Returns the new generation.
    pub fn advance(&self, fence: impl IntoIterator<Item = PipelineEvent>) -> u64 {
        let mut current = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        for event in fence {
            self.send(event);
        }
        *current += 1;
        *current
    }

    fn send(&self, event: PipelineEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event receiver dropped; event discarded");
        }
    }
}
