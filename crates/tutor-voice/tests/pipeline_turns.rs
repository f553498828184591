//! Integration tests for whole speech turns.
//!
//! These drive `SpeechPipeline` end to end with a scripted synthesizer and
//! the clock-driven `SimulatedSink`. Every test runs on a paused Tokio clock,
//! so synthesis latency and playback time are exact and nothing touches the
//! network or an audio device.
//!
//! # What is tested
//!
//! - Playback order follows unit order even when synthesis finishes in reverse
//!   or in any shuffled order
//! - Later units are synthesized while earlier ones play, but never jump ahead
//! - Drain fires exactly once per turn
//! - Failed units are skipped without stalling the queue
//! - `stop()` is idempotent and nothing from the stopped turn follows it
//! - `stop()` before the first fragment still cancels `speak_stream`
//! - No text is lost or duplicated across unit boundaries
//! - Run-on input is cut at the word ceiling

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tutor_voice::{
    DecodedAudio, PipelineConfig, PipelineEvent, PlaybackCompletion, PlaybackSink,
    SimulatedSink, SpeechPipeline, SynthesisParams, Synthesizer, UnitFailure, UnitId,
    VoiceError, cue,
};

// ── Scripted backends ──────────────────────────────────────────────

/// Synthesizer with per-text latency and failures.
///
/// Audio lasts 100 ms per word; unscripted texts take 10 ms to synthesize.
#[derive(Default)]
struct Scripted {
    delays: HashMap<&'static str, u64>,
    failures: Vec<&'static str>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl Scripted {
    fn with_delays(delays: &[(&'static str, u64)]) -> Self {
        Self {
            delays: delays.iter().copied().collect(),
            ..Self::default()
        }
    }

    fn failing(texts: &[&'static str]) -> Self {
        Self {
            failures: texts.to_vec(),
            ..Self::default()
        }
    }

    fn call_started(&self, text: &str) -> Option<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(t, _)| t == text)
            .map(|(_, at)| *at)
    }
}

#[async_trait]
impl Synthesizer for Scripted {
    async fn synthesize(
        &self,
        text: &str,
        _params: &SynthesisParams,
    ) -> Result<DecodedAudio, VoiceError> {
        self.calls
            .lock()
            .unwrap()
            .push((text.to_string(), Instant::now()));

        let delay = self.delays.get(text).copied().unwrap_or(10);
        tokio::time::sleep(Duration::from_millis(delay)).await;

        if self.failures.contains(&text) {
            return Err(VoiceError::SynthesisHttp {
                status: 500,
                body: "internal error".to_string(),
            });
        }
        let words = u64::try_from(text.split_whitespace().count()).unwrap();
        Ok(DecodedAudio::silence(
            Duration::from_millis(100 * words),
            8_000,
        ))
    }
}

/// A sink whose device is gone.
struct BrokenSink;

impl PlaybackSink for BrokenSink {
    fn play(&self, _audio: DecodedAudio) -> Result<PlaybackCompletion, VoiceError> {
        Err(VoiceError::OutputStreamError("no output device".to_string()))
    }

    fn stop(&self) {}
}

// ── Helpers ────────────────────────────────────────────────────────

fn one_sentence_per_unit() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.segmentation.sentences_per_unit = 1;
    config
}

fn build(
    config: PipelineConfig,
    synth: Arc<Scripted>,
) -> (
    SpeechPipeline,
    UnboundedReceiver<PipelineEvent>,
    Arc<SimulatedSink>,
) {
    let sink = Arc::new(SimulatedSink::new().unwrap());
    let (pipeline, rx) =
        SpeechPipeline::new(config, synth, Arc::clone(&sink) as Arc<dyn PlaybackSink>).unwrap();
    (pipeline, rx, sink)
}

/// Receive events, stamped with time since `start`, until `Drained`.
async fn until_drained(
    rx: &mut UnboundedReceiver<PipelineEvent>,
    start: Instant,
) -> Vec<(Duration, PipelineEvent)> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("pipeline should drain")
            .expect("event channel open");
        let done = event == PipelineEvent::Drained;
        events.push((start.elapsed(), event));
        if done {
            return events;
        }
    }
}

fn pending(rx: &mut UnboundedReceiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn started_ids(events: &[(Duration, PipelineEvent)]) -> Vec<UnitId> {
    events
        .iter()
        .filter_map(|(_, e)| match e {
            PipelineEvent::UnitStarted { id, .. } => Some(*id),
            _ => None,
        })
        .collect()
}

fn started_at(events: &[(Duration, PipelineEvent)], unit: u64) -> Duration {
    events
        .iter()
        .find_map(|(at, e)| match e {
            PipelineEvent::UnitStarted { id, .. } if *id == UnitId(unit) => Some(*at),
            _ => None,
        })
        .unwrap()
}

// ── Ordering ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn plays_in_unit_order_despite_reversed_latency() {
    let synth = Arc::new(Scripted::with_delays(&[
        ("Uno.", 300),
        ("Dos.", 200),
        ("Tres.", 100),
    ]));
    let (pipeline, mut rx, sink) = build(one_sentence_per_unit(), synth);
    let start = Instant::now();

    pipeline.feed("Uno. ").unwrap();
    pipeline.feed("Dos. ").unwrap();
    pipeline.feed("Tres. ").unwrap();
    pipeline.finish().unwrap();

    let events = until_drained(&mut rx, start).await;
    assert_eq!(started_ids(&events), vec![UnitId(0), UnitId(1), UnitId(2)]);
    assert_eq!(sink.play_count(), 3);

    // Units 1 and 2 were ready long before their turn came.
    assert_eq!(started_at(&events, 0), Duration::from_millis(300));
    assert_eq!(started_at(&events, 1), Duration::from_millis(400));
    assert_eq!(started_at(&events, 2), Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn plays_in_unit_order_for_shuffled_latencies() {
    const SENTENCES: [&str; 6] = ["Uno.", "Dos.", "Tres.", "Cuatro.", "Cinco.", "Seis."];
    let expected: Vec<UnitId> = (0..6).map(UnitId).collect();

    for seed in 0..10 {
        let mut delays: Vec<u64> = (1..=6).map(|i| i * 50).collect();
        delays.shuffle(&mut StdRng::seed_from_u64(seed));
        let script: Vec<(&'static str, u64)> = SENTENCES.into_iter().zip(delays).collect();
        let (pipeline, mut rx, sink) =
            build(one_sentence_per_unit(), Arc::new(Scripted::with_delays(&script)));

        for sentence in SENTENCES {
            pipeline.feed(&format!("{sentence} ")).unwrap();
        }
        pipeline.finish().unwrap();

        let events = until_drained(&mut rx, Instant::now()).await;
        assert_eq!(started_ids(&events), expected, "seed {seed}");
        assert_eq!(sink.play_count(), 6, "seed {seed}");
    }
}

#[tokio::test(start_paused = true)]
async fn head_of_line_unit_holds_back_ready_units() {
    let synth = Arc::new(Scripted::with_delays(&[("Uno.", 500), ("Dos.", 10)]));
    let (pipeline, mut rx, _sink) = build(one_sentence_per_unit(), Arc::clone(&synth));
    let start = Instant::now();

    pipeline.feed("Uno. Dos. ").unwrap();
    pipeline.finish().unwrap();
    let events = until_drained(&mut rx, start).await;

    // Unit 1 was prefetched while unit 0 was still synthesizing...
    let dos_requested = synth.call_started("Dos.").unwrap();
    assert!(dos_requested.duration_since(start) < Duration::from_millis(500));

    // ...but only plays once unit 0 has finished (500 ms + 100 ms audio).
    assert!(started_at(&events, 1) >= Duration::from_millis(600));
    assert_eq!(started_ids(&events), vec![UnitId(0), UnitId(1)]);
}

// ── Drain ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn drains_exactly_once() {
    let synth = Arc::new(Scripted::default());
    let (pipeline, mut rx, _sink) = build(PipelineConfig::default(), synth);
    let drained = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&drained);
    pipeline.set_on_drained(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    pipeline.feed("Uno. Dos. Tres.").unwrap();
    pipeline.finish().unwrap();
    let events = until_drained(&mut rx, Instant::now()).await;
    pipeline.on_stream_complete();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(drained.load(Ordering::SeqCst), 1);
    assert!(pending(&mut rx).is_empty());

    let talking: Vec<bool> = events
        .iter()
        .filter_map(|(_, e)| match e {
            PipelineEvent::TalkingChanged { talking } => Some(*talking),
            _ => None,
        })
        .collect();
    assert_eq!(talking, vec![true, false]);
    assert!(!pipeline.speaking_gate().is_speaking());
}

// ── Failures ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn failed_unit_is_skipped() {
    let synth = Arc::new(Scripted::failing(&["Dos."]));
    let (pipeline, mut rx, sink) = build(one_sentence_per_unit(), synth);

    pipeline.feed("Uno. Dos. ").unwrap();
    pipeline.feed("Tres.").unwrap();
    pipeline.finish().unwrap();
    let events = until_drained(&mut rx, Instant::now()).await;

    assert_eq!(started_ids(&events), vec![UnitId(0), UnitId(2)]);
    assert_eq!(sink.play_count(), 2);
    assert!(events.iter().any(|(_, e)| matches!(
        e,
        PipelineEvent::UnitSkipped {
            id: UnitId(1),
            reason: UnitFailure::Synthesis(_)
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn broken_sink_skips_everything_and_still_drains() {
    let (pipeline, mut rx) = SpeechPipeline::new(
        PipelineConfig::default(),
        Arc::new(Scripted::default()),
        Arc::new(BrokenSink),
    )
    .unwrap();

    pipeline.feed("Hola, ¿me oyes? No.").unwrap();
    pipeline.finish().unwrap();
    let events = until_drained(&mut rx, Instant::now()).await;

    let skipped = events
        .iter()
        .filter(|(_, e)| {
            matches!(
                e,
                PipelineEvent::UnitSkipped {
                    reason: UnitFailure::Playback(_),
                    ..
                }
            )
        })
        .count();
    assert_eq!(skipped, 2);
    assert!(
        !events
            .iter()
            .any(|(_, e)| matches!(e, PipelineEvent::TalkingChanged { .. }))
    );
}

// ── Stop ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent_and_final() {
    let mut config = PipelineConfig::default();
    config.caption_max_words = 2;
    let (pipeline, mut rx, sink) = build(config, Arc::new(Scripted::default()));

    pipeline
        .feed("Una frase bastante larga para hablar durante un buen rato. Y otra. ")
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(pipeline.is_playing());

    pipeline.stop();
    pipeline.stop();

    let events = pending(&mut rx);
    assert_eq!(events.last(), Some(&PipelineEvent::Stopped));
    assert_eq!(
        events
            .iter()
            .filter(|e| **e == PipelineEvent::Stopped)
            .count(),
        1
    );
    assert!(events.contains(&PipelineEvent::TalkingChanged { talking: false }));
    assert_eq!(sink.interruptions(), 1);
    assert!(!pipeline.is_playing());
    assert_eq!(pipeline.queued_units(), 0);
    assert!(!pipeline.speaking_gate().is_speaking());

    // Caption timers and pending synthesis from the stopped turn stay quiet.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(pending(&mut rx).is_empty());
    assert_eq!(sink.play_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_before_first_fragment_cancels_the_stream() {
    let (pipeline, mut rx, sink) = build(PipelineConfig::default(), Arc::new(Scripted::default()));
    // The first fragment takes 500 ms to arrive, like a model's first token.
    let fragments = futures_util::stream::iter(["Hola. ", "¿Qué tal? "].map(String::from)).then(
        |fragment| async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            fragment
        },
    );
    let stop_early = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        pipeline.stop();
    };

    let (result, ()) = tokio::join!(pipeline.speak_stream(fragments), stop_early);
    assert!(matches!(result, Err(VoiceError::Cancelled)));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(sink.play_count(), 0);
    assert!(
        !pending(&mut rx)
            .iter()
            .any(|e| matches!(e, PipelineEvent::UnitQueued { .. }))
    );

    // Once the grace period is over the next turn speaks normally.
    let next = futures_util::stream::iter(["Otra vez. ".to_string()]);
    pipeline.speak_stream(next).await.unwrap();
    assert_eq!(sink.play_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn new_turn_after_stop_starts_from_zero() {
    let (pipeline, mut rx, _sink) = build(PipelineConfig::default(), Arc::new(Scripted::default()));

    pipeline.feed("Primera respuesta. Sin terminar").unwrap();
    pipeline.stop();
    pipeline.reset();
    let _ = pending(&mut rx);

    assert_eq!(pipeline.feed("Segunda. ").unwrap(), vec![UnitId(0)]);
    pipeline.finish().unwrap();
    let events = until_drained(&mut rx, Instant::now()).await;

    let queued: Vec<String> = events
        .iter()
        .filter_map(|(_, e)| match e {
            PipelineEvent::UnitQueued { text, .. } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(queued, vec!["Segunda.".to_string()]);
}

// ── Segmentation through the pipeline ──────────────────────────────

#[tokio::test(start_paused = true)]
async fn no_text_lost_across_units() {
    let text = "Hoy [Happy] vamos a repasar fracciones. Una fracción tiene numerador y \
                denominador, separados por una línea. El numerador va arriba! ¿Y el \
                denominador? Va abajo, claro. [Thinking] Piensa en una pizza cortada en ocho \
                partes iguales sin dejar de contar porciones hasta terminar toda la cena \
                familiar del domingo por la noche";
    let (pipeline, mut rx, _sink) = build(PipelineConfig::default(), Arc::new(Scripted::default()));

    let chars: Vec<char> = text.chars().collect();
    let mut ids = Vec::new();
    for chunk in chars.chunks(7) {
        let fragment: String = chunk.iter().collect();
        ids.extend(pipeline.feed(&fragment).unwrap());
    }
    ids.extend(pipeline.finish().unwrap());

    let expected: Vec<UnitId> = (0..ids.len() as u64).map(UnitId).collect();
    assert_eq!(ids, expected);
    assert!(ids.len() > 1);

    let events = until_drained(&mut rx, Instant::now()).await;
    let spoken: Vec<String> = events
        .iter()
        .filter_map(|(_, e)| match e {
            PipelineEvent::UnitQueued { text, .. } => Some(text.clone()),
            _ => None,
        })
        .flat_map(|text| {
            text.split_whitespace()
                .map(String::from)
                .collect::<Vec<_>>()
        })
        .collect();
    assert_eq!(spoken, cue::extract(text).words);
}

#[tokio::test(start_paused = true)]
async fn run_on_text_is_cut_at_word_ceiling() {
    let (pipeline, mut rx, _sink) = build(PipelineConfig::default(), Arc::new(Scripted::default()));
    let run_on: String = (0..30).map(|i| format!("palabra{i} ")).collect();

    assert_eq!(pipeline.feed(&run_on).unwrap(), vec![UnitId(0)]);
    assert_eq!(pipeline.finish().unwrap(), Some(UnitId(1)));

    let events = until_drained(&mut rx, Instant::now()).await;
    let lengths: Vec<usize> = events
        .iter()
        .filter_map(|(_, e)| match e {
            PipelineEvent::UnitQueued { text, .. } => Some(text.split_whitespace().count()),
            _ => None,
        })
        .collect();
    assert_eq!(lengths, vec![25, 5]);
}
