//! Synthesis requester — eager, bounded prefetch.
//!
//! A request is issued the moment a unit is cut, never when the unit reaches
//! the head of the playback queue, so synthesis of unit N+1 overlaps
//! playback of unit N.
//!
//! Requests go through a single dispatcher task that hands out semaphore
//! permits in request order. At most `max_concurrent_synthesis` requests are
//! in flight; earlier units always get a permit first. Completion order is
//! unconstrained and has no effect on playback order.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::audio::DecodedAudio;
use crate::config::SynthesisParams;
use crate::error::{UnitFailure, VoiceError};
use crate::text;
use crate::unit::UnitId;

// ── Synthesizer trait ──────────────────────────────────────────────

/// Turns one unit of text into decoded audio.
///
/// Implementations must be `Send + Sync`: requests for several units run
/// concurrently against the same instance.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text`. The returned audio's duration must come from the
    /// decoded samples.
    async fn synthesize(
        &self,
        text: &str,
        params: &SynthesisParams,
    ) -> Result<DecodedAudio, VoiceError>;
}

// ── Results ────────────────────────────────────────────────────────

/// Outcome of one synthesis request.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioResult {
    Ready(DecodedAudio),
    Failed(UnitFailure),
}

/// Handle to a synthesis request that may still be running.
///
/// Dropping the handle cancels the request and frees whatever it buffered.
#[derive(Debug)]
pub struct PendingAudio {
    id: UnitId,
    rx: oneshot::Receiver<AudioResult>,
    cancel: CancellationToken,
}

impl PendingAudio {
    /// A handle that is already resolved.
    #[must_use]
    pub fn resolved(id: UnitId, result: AudioResult) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self {
            id,
            rx,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> UnitId {
        self.id
    }

    /// Wait for the request to resolve.
    ///
    /// Never fails: a request whose task vanished without answering counts
    /// as cancelled if its token fired and as a synthesis failure otherwise.
    pub async fn wait(&mut self) -> AudioResult {
        match (&mut self.rx).await {
            Ok(result) => result,
            Err(_) if self.cancel.is_cancelled() => AudioResult::Failed(UnitFailure::Cancelled),
            Err(_) => AudioResult::Failed(UnitFailure::Synthesis(
                "synthesis task ended without a result".to_string(),
            )),
        }
    }
}

impl Drop for PendingAudio {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Requester ──────────────────────────────────────────────────────

struct Job {
    id: UnitId,
    text: String,
    cancel: CancellationToken,
    reply: oneshot::Sender<AudioResult>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Issues synthesis requests on behalf of the pipeline.
#[derive(Debug, Clone)]
pub struct SynthesisRequester {
    jobs: mpsc::UnboundedSender<Job>,
}

impl SynthesisRequester {
    /// Start the dispatcher task on `runtime`.
    ///
    /// The dispatcher exits once every clone of the requester is dropped.
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        params: SynthesisParams,
        max_concurrent: usize,
        runtime: &Handle,
    ) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
        runtime.spawn(dispatch(rx, synthesizer, Arc::new(params), permits));
        Self { jobs }
    }

    /// Request synthesis of `text` for unit `id`.
    ///
    /// The request observes a child of `turn`, so cancelling the turn aborts
    /// every request issued under it.
    pub fn request(&self, id: UnitId, text: &str, turn: &CancellationToken) -> PendingAudio {
        let cancel = turn.child_token();
        let (reply, rx) = oneshot::channel();
        let job = Job {
            id,
            text: text.to_string(),
            cancel: cancel.clone(),
            reply,
        };

        debug!(unit = %id, text = %text::preview(text, 60), "Requesting synthesis");
        if let Err(mpsc::error::SendError(job)) = self.jobs.send(job) {
            let _ = job.reply.send(AudioResult::Failed(UnitFailure::Synthesis(
                "synthesis dispatcher is not running".to_string(),
            )));
        }

        PendingAudio { id, rx, cancel }
    }
}

async fn dispatch(
    mut jobs: mpsc::UnboundedReceiver<Job>,
    synthesizer: Arc<dyn Synthesizer>,
    params: Arc<SynthesisParams>,
    permits: Arc<Semaphore>,
) {
    while let Some(job) = jobs.recv().await {
        let permit = tokio::select! {
            biased;
            () = job.cancel.cancelled() => {
                debug!(unit = %job.id, "Synthesis cancelled before it started");
                let _ = job.reply.send(AudioResult::Failed(UnitFailure::Cancelled));
                continue;
            }
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let synthesizer = Arc::clone(&synthesizer);
        let params = Arc::clone(&params);
        tokio::spawn(async move {
            let _permit = permit;
            let result = synthesize_unit(synthesizer.as_ref(), &params, &job).await;
            let _ = job.reply.send(result);
        });
    }
    debug!("Synthesis dispatcher stopped");
}

async fn synthesize_unit(
    synthesizer: &dyn Synthesizer,
    params: &SynthesisParams,
    job: &Job,
) -> AudioResult {
    let started = Instant::now();
    tokio::select! {
        biased;
        () = job.cancel.cancelled() => {
            debug!(unit = %job.id, "Synthesis cancelled");
            AudioResult::Failed(UnitFailure::Cancelled)
        }
        result = synthesizer.synthesize(&job.text, params) => match result {
            Ok(audio) => {
                debug!(
                    unit = %job.id,
                    duration_ms = audio.duration.as_millis(),
                    elapsed_ms = started.elapsed().as_millis(),
                    "Synthesis complete"
                );
                AudioResult::Ready(audio)
            }
            Err(e) => {
                let failure = UnitFailure::from_synthesis(&e);
                if failure.is_cancellation() {
                    debug!(unit = %job.id, "Synthesis cancelled");
                } else {
                    warn!(unit = %job.id, error = %e, "Synthesis failed; unit will be skipped");
                }
                AudioResult::Failed(failure)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn short_audio() -> DecodedAudio {
        DecodedAudio::silence(Duration::from_millis(100), 8_000)
    }

    /// Sleeps per request and records concurrency and start order.
    #[derive(Default)]
    struct SlowSynth {
        active: AtomicUsize,
        peak: AtomicUsize,
        finished: AtomicUsize,
        started: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Synthesizer for SlowSynth {
        async fn synthesize(
            &self,
            text: &str,
            _params: &SynthesisParams,
        ) -> Result<DecodedAudio, VoiceError> {
            self.started.lock().unwrap().push(text.to_string());
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(short_audio())
        }
    }

    #[tokio::test]
    async fn test_successful_request_is_ready() {
        let mut mock = MockSynthesizer::new();
        mock.expect_synthesize()
            .withf(|text, _| text.trim() == "Hola.")
            .times(1)
            .returning(|_, _| Ok(short_audio()));

        let requester =
            SynthesisRequester::new(Arc::new(mock), SynthesisParams::default(), 2, &Handle::current());
        let turn = CancellationToken::new();
        let mut pending = requester.request(UnitId(0), "Hola.", &turn);

        assert_eq!(pending.id(), UnitId(0));
        assert_eq!(pending.wait().await, AudioResult::Ready(short_audio()));
    }

    #[tokio::test]
    async fn test_failed_request_resolves_as_failed() {
        let mut mock = MockSynthesizer::new();
        mock.expect_synthesize().returning(|_, _| {
            Err(VoiceError::SynthesisHttp {
                status: 500,
                body: "boom".to_string(),
            })
        });

        let requester =
            SynthesisRequester::new(Arc::new(mock), SynthesisParams::default(), 2, &Handle::current());
        let turn = CancellationToken::new();
        let result = requester.request(UnitId(1), "Falla.", &turn).wait().await;

        assert!(matches!(result, AudioResult::Failed(UnitFailure::Synthesis(r)) if r.contains("500")));
    }

    #[tokio::test]
    async fn test_cancelled_turn_never_calls_synthesizer() {
        let mut mock = MockSynthesizer::new();
        mock.expect_synthesize().never();

        let requester =
            SynthesisRequester::new(Arc::new(mock), SynthesisParams::default(), 2, &Handle::current());
        let turn = CancellationToken::new();
        turn.cancel();
        let result = requester.request(UnitId(0), "Nunca.", &turn).wait().await;

        assert_eq!(result, AudioResult::Failed(UnitFailure::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let synth = Arc::new(SlowSynth::default());
        let requester = SynthesisRequester::new(
            Arc::clone(&synth) as Arc<dyn Synthesizer>,
            SynthesisParams::default(),
            2,
            &Handle::current(),
        );
        let turn = CancellationToken::new();

        let mut pending: Vec<PendingAudio> = (0..5)
            .map(|i| requester.request(UnitId(i), &format!("Unidad {i}."), &turn))
            .collect();
        for p in &mut pending {
            assert!(matches!(p.wait().await, AudioResult::Ready(_)));
        }

        assert_eq!(synth.peak.load(Ordering::SeqCst), 2);
        assert_eq!(synth.finished.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permits_are_granted_in_request_order() {
        let synth = Arc::new(SlowSynth::default());
        let requester = SynthesisRequester::new(
            Arc::clone(&synth) as Arc<dyn Synthesizer>,
            SynthesisParams::default(),
            1,
            &Handle::current(),
        );
        let turn = CancellationToken::new();

        let mut pending: Vec<PendingAudio> = ["a", "b", "c", "d"]
            .iter()
            .zip(0u64..)
            .map(|(t, i)| requester.request(UnitId(i), t, &turn))
            .collect();
        for p in &mut pending {
            p.wait().await;
        }

        assert_eq!(*synth.started.lock().unwrap(), vec!["a", "b", "c", "d"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_aborts_request() {
        let synth = Arc::new(SlowSynth::default());
        let requester = SynthesisRequester::new(
            Arc::clone(&synth) as Arc<dyn Synthesizer>,
            SynthesisParams::default(),
            1,
            &Handle::current(),
        );
        let turn = CancellationToken::new();

        let dropped = requester.request(UnitId(0), "adiós", &turn);
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(dropped);

        // The permit is released, so the next request runs to completion.
        let mut next = requester.request(UnitId(1), "hola", &turn);
        assert!(matches!(next.wait().await, AudioResult::Ready(_)));
        assert_eq!(synth.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolved_handle() {
        let mut pending =
            PendingAudio::resolved(UnitId(3), AudioResult::Failed(UnitFailure::Cancelled));
        assert_eq!(pending.wait().await, AudioResult::Failed(UnitFailure::Cancelled));
    }
}
