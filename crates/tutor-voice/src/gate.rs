//! Speaking gate — tells collaborators when the tutor is talking.
//!
//! A microphone or speech-recognition front end must not treat the tutor's
//! own voice as user input. The playback queue raises this flag when the
//! first unit of a stretch of speech starts and lowers it when the queue
//! goes idle or the turn is stopped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared "assistant is speaking" flag. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SpeakingGate {
    is_speaking: Arc<AtomicBool>,
}

impl SpeakingGate {
    /// Create a new gate (initially silent).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the tutor as speaking. Returns `true` if it was silent before.
    pub fn start_speaking(&self) -> bool {
        let was_speaking = self.is_speaking.swap(true, Ordering::SeqCst);
        if !was_speaking {
            tracing::debug!("Speaking gate: tutor speaking");
        }
        !was_speaking
    }

    /// Mark the tutor as silent. Returns `true` if it was speaking before.
    pub fn stop_speaking(&self) -> bool {
        let was_speaking = self.is_speaking.swap(false, Ordering::SeqCst);
        if was_speaking {
            tracing::debug!("Speaking gate: tutor silent");
        }
        was_speaking
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.is_speaking.load(Ordering::SeqCst)
    }
}
