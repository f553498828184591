//! HTTP synthesis backend.
//!
//! Posts each unit as a multipart form to the tutoring backend's `/tts`
//! endpoint:
//!
//! | Field   | Value                        |
//! |---------|------------------------------|
//! | `texto` | cleaned unit text            |
//! | `voz`   | voice identifier             |
//! | `speed` | speaking rate, clamped       |
//! | `pitch` | pitch shift, e.g. `+0Hz`     |
//!
//! The response body is an encoded audio asset (MP3 or WAV). Its duration
//! is probed after decoding.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::Form;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audio::{self, DecodedAudio};
use crate::config::SynthesisParams;
use crate::error::VoiceError;
use crate::synthesis::Synthesizer;
use crate::text;

/// Longest error body kept in [`VoiceError::SynthesisHttp`].
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Connection settings for [`HttpSynthesizer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSynthesizerConfig {
    /// Full URL of the synthesis endpoint.
    pub endpoint: String,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HttpSynthesizerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8000/tts".to_string(),
            timeout_secs: 30,
        }
    }
}

/// [`Synthesizer`] backed by a remote HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpSynthesizer {
    client: Client,
    config: HttpSynthesizerConfig,
}

impl HttpSynthesizer {
    pub fn new(config: HttpSynthesizerConfig) -> Result<Self, VoiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }
}

/// Form fields sent for one unit, in wire order.
#[must_use]
pub fn form_fields(text: &str, params: &SynthesisParams) -> [(&'static str, String); 4] {
    [
        ("texto", text.to_string()),
        ("voz", params.voice.clone()),
        ("speed", params.clamped_speed().to_string()),
        ("pitch", params.pitch.clone()),
    ]
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        params: &SynthesisParams,
    ) -> Result<DecodedAudio, VoiceError> {
        let form = form_fields(text, params)
            .into_iter()
            .fold(Form::new(), |form, (name, value)| form.text(name, value));

        let started = Instant::now();
        let response = self
            .client
            .post(&self.config.endpoint)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::SynthesisHttp {
                status: status.as_u16(),
                body: text::preview(body.trim(), MAX_ERROR_BODY_CHARS),
            });
        }

        let bytes = response.bytes().await?;
        debug!(
            bytes = bytes.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "Received synthesized audio"
        );

        tokio::task::spawn_blocking(move || audio::decode(bytes.to_vec()))
            .await
            .map_err(|e| VoiceError::DecodeError(format!("decode task failed: {e}")))?
    }
}
