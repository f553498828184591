//! CLI entry point - wires the speech pipeline to stdin and the terminal.
//!
//! Text streams in from stdin (or the TEXT argument), audio goes to the
//! default output device, and caption/cue events are printed as they fire.
//! Ctrl-C stops the turn immediately.

mod cli;
mod input;
mod render;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tutor_voice::{
    HttpSynthesizer, PlaybackSink, RodioSink, SilentSynthesizer, SimulatedSink, SpeechPipeline,
    Synthesizer, VoiceError,
};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before parsing so env-backed flags see it
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.pipeline_config()?;
    let (synthesizer, sink): (Arc<dyn Synthesizer>, Arc<dyn PlaybackSink>) = if cli.dry_run {
        info!("Dry run: no synthesis endpoint or audio device");
        (
            Arc::new(SilentSynthesizer::default()),
            Arc::new(SimulatedSink::new()?),
        )
    } else {
        (
            Arc::new(HttpSynthesizer::new(cli.http_config())?),
            Arc::new(RodioSink::open().context("failed to open the audio output device")?),
        )
    };

    let (pipeline, mut events) = SpeechPipeline::new(config, synthesizer, sink)?;
    let format = cli.events;
    let renderer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = render::render(&event, format, &mut stdout) {
                debug!(error = %e, "Stdout closed; no longer rendering events");
                break;
            }
        }
    });

    let outcome = match &cli.text {
        Some(text) => speak(&pipeline, input::word_fragments(text)).await,
        None => speak(&pipeline, input::read_fragments(tokio::io::stdin())).await,
    };

    drop(pipeline);
    renderer.await.context("event renderer panicked")?;

    if let Some(code) = exit_code(outcome)? {
        // A stdin read blocked in the runtime would hold up its shutdown.
        std::io::Write::flush(&mut std::io::stdout()).ok();
        std::process::exit(code);
    }
    Ok(())
}

/// How a spoken turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    Drained,
    Interrupted,
}

/// Speak one turn, stopping early on Ctrl-C.
async fn speak(
    pipeline: &SpeechPipeline,
    fragments: impl futures_util::Stream<Item = String>,
) -> Result<Ending, VoiceError> {
    tokio::select! {
        result = pipeline.speak_stream(fragments) => result.map(|()| Ending::Drained),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted; stopping speech");
            pipeline.stop();
            Ok(Ending::Interrupted)
        }
    }
}

/// Process exit code to force, if the turn did not end on its own.
fn exit_code(outcome: Result<Ending, VoiceError>) -> anyhow::Result<Option<i32>> {
    match outcome {
        Ok(Ending::Drained) => Ok(None),
        // Only an interrupt stops the turn.
        Ok(Ending::Interrupted) | Err(VoiceError::Cancelled) => Ok(Some(130)),
        Err(e) => Err(e.into()),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "tutor_voice=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
