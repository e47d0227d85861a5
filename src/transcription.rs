//! Speech-to-text over an OpenAI-compatible `/audio/transcriptions` endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::TranscriptionConfig;
use crate::error::{GatewayError, GatewayResult};

const SERVICE: &str = "transcription";

/// Text recognised from an audio clip. `text` is already trimmed.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub language: Option<String>,
    pub language_probability: Option<f64>,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Fails fast with `ServiceUnavailable` when the engine is switched off.
    fn availability(&self) -> GatewayResult<()>;

    async fn transcribe(&self, audio: Vec<u8>, filename: &str) -> GatewayResult<Transcript>;
}

pub struct HttpTranscriber {
    client: reqwest::Client,
    url: String,
    model: String,
    timeout_secs: u64,
}

impl HttpTranscriber {
    pub fn new(config: &TranscriptionConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
        })
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    language_probability: Option<f64>,
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    fn availability(&self) -> GatewayResult<()> {
        Ok(())
    }

    async fn transcribe(&self, audio: Vec<u8>, filename: &str) -> GatewayResult<Transcript> {
        debug!(bytes = audio.len(), filename, "transcription request");

        let part = reqwest::multipart::Part::bytes(audio).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(SERVICE, self.timeout_secs, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::upstream(
                SERVICE,
                format!("STT API error {}: {}", status, body),
            ));
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::from_reqwest(SERVICE, self.timeout_secs, e))?;

        Ok(Transcript {
            text: parsed.text.trim().to_string(),
            language: parsed.language.filter(|l| !l.is_empty()),
            language_probability: parsed.language_probability,
        })
    }
}

/// Stand-in used when `[transcription] enabled = false`.
pub struct DisabledTranscriber;

#[async_trait]
impl Transcriber for DisabledTranscriber {
    fn availability(&self) -> GatewayResult<()> {
        Err(GatewayError::unavailable("Transcription service is disabled"))
    }

    async fn transcribe(&self, _audio: Vec<u8>, _filename: &str) -> GatewayResult<Transcript> {
        Err(GatewayError::unavailable("Transcription service is disabled"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_transcriber_is_unavailable() {
        let t = DisabledTranscriber;
        assert!(matches!(
            t.availability(),
            Err(GatewayError::ServiceUnavailable(_))
        ));
        let err = t.transcribe(vec![0; 4], "a.wav").await.unwrap_err();
        assert_eq!(err.code(), "service_unavailable");
    }

    #[test]
    fn test_response_tolerates_missing_language_fields() {
        let parsed: TranscriptionResponse = serde_json::from_str(r#"{"text":" hi "}"#).unwrap();
        assert_eq!(parsed.text, " hi ");
        assert!(parsed.language.is_none());
        assert!(parsed.language_probability.is_none());
    }
}
