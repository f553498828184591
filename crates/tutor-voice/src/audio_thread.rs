//! Audio actor thread — owns the `!Send` rodio output stream.
//!
//! `rodio::OutputStream` cannot cross threads on some platforms, so the
//! [`AudioPlayback`] that holds it lives on one OS thread for its whole life.
//! [`AudioThreadHandle`] is the `Send + Sync` side: each call becomes a
//! [`Request`] on a std channel and, where an answer is needed, waits for the
//! reply on a one-off channel.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use crate::audio::DecodedAudio;
use crate::error::VoiceError;
use crate::playback::{AudioPlayback, PlaybackCompletion, PlaybackDone};

// ── Requests ───────────────────────────────────────────────────────

enum Request {
    /// Start a unit, cutting off whatever is still audible.
    Play {
        audio: DecodedAudio,
        done: PlaybackDone,
        started: Sender<Result<(), VoiceError>>,
    },

    /// Silence the device. No reply.
    Stop,

    /// Leave the loop and release the device.
    Close,
}

// ── Handle ─────────────────────────────────────────────────────────

/// Thread-safe proxy for the audio actor.
///
/// Calls that need an answer block for a channel round trip plus the time
/// rodio takes to append a buffer to a fresh sink.
pub struct AudioThreadHandle {
    requests: Sender<Request>,
    worker: Option<JoinHandle<()>>,
}

impl AudioThreadHandle {
    /// Start the actor and open the default output device on it.
    ///
    /// Fails if the thread cannot be spawned or the device cannot be opened.
    pub fn spawn() -> Result<Self, VoiceError> {
        let (requests, inbox) = mpsc::channel::<Request>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), VoiceError>>();

        let worker = thread::Builder::new()
            .name("tutor-voice-audio".into())
            .spawn(move || actor(&inbox, &ready_tx))
            .map_err(|e| VoiceError::OutputStreamError(format!("cannot start audio thread: {e}")))?;

        // The device is opened on the actor; surface its result here.
        ready_rx.recv().map_err(|_| VoiceError::AudioThreadDied)??;

        Ok(Self {
            requests,
            worker: Some(worker),
        })
    }

    /// Start playing `audio`; the completion resolves when it ends.
    pub fn play(&self, audio: DecodedAudio) -> Result<PlaybackCompletion, VoiceError> {
        let (done, completion) = PlaybackCompletion::channel();
        let (started, reply) = mpsc::channel();
        self.send(Request::Play {
            audio,
            done,
            started,
        })?;
        reply.recv().map_err(|_| VoiceError::AudioThreadDied)??;
        Ok(completion)
    }

    /// Silence the device without waiting for the actor.
    pub fn stop(&self) {
        if self.send(Request::Stop).is_err() {
            tracing::debug!("Audio thread gone; nothing to stop");
        }
    }

    fn send(&self, request: Request) -> Result<(), VoiceError> {
        self.requests
            .send(request)
            .map_err(|_| VoiceError::AudioThreadDied)
    }
}

impl Drop for AudioThreadHandle {
    fn drop(&mut self) {
        let _ = self.requests.send(Request::Close);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ── Actor loop ─────────────────────────────────────────────────────

/// Runs on the audio thread. `AudioPlayback` is created and dropped here.
fn actor(inbox: &Receiver<Request>, ready: &Sender<Result<(), VoiceError>>) {
    let mut playback = match AudioPlayback::new() {
        Ok(playback) => playback,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    for request in inbox {
        match request {
            Request::Play {
                audio,
                done,
                started,
            } => {
                let _ = started.send(playback.play(audio, done));
            }
            Request::Stop => playback.stop(),
            Request::Close => break,
        }
    }

    playback.stop();
    tracing::debug!("Audio thread closed");
}
