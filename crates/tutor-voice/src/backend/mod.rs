//! Synthesis backends — concrete [`Synthesizer`](crate::synthesis::Synthesizer)
//! implementations.
//!
//! | Module   | Engine                                            |
//! |----------|---------------------------------------------------|
//! | [`http`] | Remote `/tts` endpoint returning an encoded asset |
//!
//! The pipeline only sees `Arc<dyn Synthesizer>`, so tests and alternative
//! engines plug in without touching it.

pub mod http;

pub use http::{HttpSynthesizer, HttpSynthesizerConfig};
