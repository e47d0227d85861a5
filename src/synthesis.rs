//! Text-to-speech over an OpenAI-compatible `/audio/speech` endpoint.
//!
//! The engine is always asked for WAV. Returned audio is inspected with
//! `hound` so callers can report sample rate and duration without decoding
//! the whole clip.

use async_trait::async_trait;
use std::io::Cursor;
use std::time::Duration;
use tracing::debug;

use crate::config::SynthesisConfig;
use crate::error::{GatewayError, GatewayResult};

const SERVICE: &str = "synthesis";

#[derive(Debug, Clone)]
pub struct Waveform {
    pub bytes: Vec<u8>,
}

/// Header facts read from a WAV clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_secs: f64,
}

impl Waveform {
    /// `None` when the bytes are not a readable WAV stream.
    pub fn info(&self) -> Option<WavInfo> {
        let reader = hound::WavReader::new(Cursor::new(&self.bytes)).ok()?;
        let spec = reader.spec();
        let frames = reader.duration();
        let duration_secs = if spec.sample_rate == 0 {
            0.0
        } else {
            frames as f64 / spec.sample_rate as f64
        };
        Some(WavInfo {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            duration_secs,
        })
    }
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn availability(&self) -> GatewayResult<()>;

    async fn synthesize(&self, text: &str, voice: &str, speed: f64) -> GatewayResult<Waveform>;

    /// Voice identifiers offered to clients.
    fn voices(&self) -> Vec<String>;

    fn default_voice(&self) -> &str;
}

pub struct HttpSynthesizer {
    client: reqwest::Client,
    url: String,
    model: String,
    default_voice: String,
    voices: Vec<String>,
    timeout_secs: u64,
}

impl HttpSynthesizer {
    pub fn new(config: &SynthesisConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            default_voice: config.default_voice.clone(),
            voices: config.voices.clone(),
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    fn availability(&self) -> GatewayResult<()> {
        Ok(())
    }

    async fn synthesize(&self, text: &str, voice: &str, speed: f64) -> GatewayResult<Waveform> {
        debug!(voice, speed, chars = text.chars().count(), "synthesis request");

        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": voice,
            "speed": speed,
            "response_format": "wav",
        });

        let response = self
            .client
            .post(format!("{}/audio/speech", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(SERVICE, self.timeout_secs, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::upstream(
                SERVICE,
                format!("TTS API error {}: {}", status, body),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayError::from_reqwest(SERVICE, self.timeout_secs, e))?;
        if bytes.is_empty() {
            return Err(GatewayError::upstream(SERVICE, "engine returned no audio"));
        }

        Ok(Waveform {
            bytes: bytes.to_vec(),
        })
    }

    fn voices(&self) -> Vec<String> {
        self.voices.clone()
    }

    fn default_voice(&self) -> &str {
        &self.default_voice
    }
}

/// Stand-in used when `[synthesis] enabled = false`.
pub struct DisabledSynthesizer {
    default_voice: String,
}

impl DisabledSynthesizer {
    pub fn new(config: &SynthesisConfig) -> Self {
        Self {
            default_voice: config.default_voice.clone(),
        }
    }
}

#[async_trait]
impl Synthesizer for DisabledSynthesizer {
    fn availability(&self) -> GatewayResult<()> {
        Err(GatewayError::unavailable("Speech synthesis service is disabled"))
    }

    async fn synthesize(&self, _text: &str, _voice: &str, _speed: f64) -> GatewayResult<Waveform> {
        Err(GatewayError::unavailable("Speech synthesis service is disabled"))
    }

    fn voices(&self) -> Vec<String> {
        Vec::new()
    }

    fn default_voice(&self) -> &str {
        &self.default_voice
    }
}
