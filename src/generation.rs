//! Generation service: chat completions from an Ollama-compatible server.
//!
//! [`Generator`] is the seam the orchestrators and handlers depend on;
//! [`OllamaGenerator`] talks to `POST /api/chat` and `GET /api/tags`.
//!
//! Streaming responses are newline-delimited JSON objects of the form
//! `{"message": {"content": "..."}, "done": false}`. A line may be split
//! across network chunks, so bytes are buffered until a newline arrives
//! and only complete lines are decoded.

use async_trait::async_trait;
use base64::Engine;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::GenerationConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::models::GenerationMessage;

const SERVICE: &str = "generation";

/// Stream of text deltas from a running completion.
pub type TextStream = BoxStream<'static, GatewayResult<String>>;

#[async_trait]
pub trait Generator: Send + Sync {
    /// Runs a completion and returns the full reply text.
    async fn chat(&self, model: &str, messages: &[GenerationMessage]) -> GatewayResult<String>;

    /// Starts a completion and returns its deltas. Connection and status
    /// errors surface here, before any delta is produced.
    async fn chat_stream(
        &self,
        model: &str,
        messages: &[GenerationMessage],
    ) -> GatewayResult<TextStream>;

    /// Models known to the server, passed through as returned.
    async fn list_models(&self) -> GatewayResult<serde_json::Value>;
}

pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    timeout_secs: u64,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            timeout_secs: config.timeout_secs,
        })
    }

    async fn post_chat(
        &self,
        model: &str,
        messages: &[GenerationMessage],
        stream: bool,
    ) -> GatewayResult<reqwest::Response> {
        let body = serde_json::json!({
            "model": model,
            "messages": messages.iter().map(to_wire).collect::<Vec<_>>(),
            "stream": stream,
        });

        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(SERVICE, self.timeout_secs, e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(GatewayError::upstream(
                SERVICE,
                format!("Ollama API error {}: {}", status, error_message(&body_text)),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn chat(&self, model: &str, messages: &[GenerationMessage]) -> GatewayResult<String> {
        debug!(model, messages = messages.len(), "generation request");
        let response = self.post_chat(model, messages, false).await?;
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GatewayError::from_reqwest(SERVICE, self.timeout_secs, e))?;
        parse_chat_response(&json)
    }

    async fn chat_stream(
        &self,
        model: &str,
        messages: &[GenerationMessage],
    ) -> GatewayResult<TextStream> {
        debug!(model, messages = messages.len(), "streaming generation request");
        let response = self.post_chat(model, messages, true).await?;
        let timeout_secs = self.timeout_secs;
        let bytes = response
            .bytes_stream()
            .map(move |r| r.map_err(|e| GatewayError::from_reqwest(SERVICE, timeout_secs, e)))
            .boxed();
        Ok(ndjson_deltas(bytes))
    }

    async fn list_models(&self) -> GatewayResult<serde_json::Value> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.url))
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(SERVICE, self.timeout_secs, e))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(GatewayError::upstream(
                SERVICE,
                format!("Ollama API error {}: {}", status, error_message(&body_text)),
            ));
        }
        response
            .json()
            .await
            .map_err(|e| GatewayError::from_reqwest(SERVICE, self.timeout_secs, e))
    }
}

fn to_wire(message: &GenerationMessage) -> serde_json::Value {
    let mut value = serde_json::json!({
        "role": message.role.as_str(),
        "content": message.content,
    });
    if !message.images.is_empty() {
        let images: Vec<String> = message
            .images
            .iter()
            .map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes))
            .collect();
        value["images"] = serde_json::json!(images);
    }
    value
}

/// Pulls `error` out of an Ollama error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        .unwrap_or_else(|| body.to_string())
}

fn parse_chat_response(json: &serde_json::Value) -> GatewayResult<String> {
    json.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(String::from)
        .ok_or_else(|| GatewayError::upstream(SERVICE, "response is missing message.content"))
}

#[derive(Deserialize)]
struct StreamLine {
    #[serde(default)]
    message: Option<StreamMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct StreamMessage {
    #[serde(default)]
    content: String,
}

/// Decodes one NDJSON line into `(delta, done)`.
fn parse_stream_line(line: &[u8]) -> GatewayResult<Option<(String, bool)>> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let parsed: StreamLine = serde_json::from_str(text)
        .map_err(|e| GatewayError::upstream(SERVICE, format!("invalid stream line: {}", e)))?;
    if let Some(err) = parsed.error {
        return Err(GatewayError::upstream(SERVICE, err));
    }
    let delta = parsed.message.map(|m| m.content).unwrap_or_default();
    Ok(Some((delta, parsed.done)))
}

/// Turns a byte stream of NDJSON into a stream of non-empty text deltas.
/// The stream ends after the `done` line, on upstream EOF, or after the
/// first error.
pub fn ndjson_deltas<B>(bytes: BoxStream<'static, GatewayResult<B>>) -> TextStream
where
    B: AsRef<[u8]> + Send + 'static,
{
    futures::stream::unfold(
        (bytes, Vec::<u8>::new(), false),
        |(mut inner, mut buf, mut finished)| async move {
            loop {
                if finished {
                    return None;
                }

                if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    match parse_stream_line(&line) {
                        Ok(None) => continue,
                        Ok(Some((delta, done))) => {
                            finished = done;
                            if delta.is_empty() {
                                continue;
                            }
                            return Some((Ok(delta), (inner, buf, finished)));
                        }
                        Err(e) => return Some((Err(e), (inner, buf, true))),
                    }
                }

                match inner.next().await {
                    Some(Ok(chunk)) => buf.extend_from_slice(chunk.as_ref()),
                    Some(Err(e)) => return Some((Err(e), (inner, buf, true))),
                    None => {
                        // Trailing line without a newline.
                        let rest = std::mem::take(&mut buf);
                        return match parse_stream_line(&rest) {
                            Ok(Some((delta, _))) if !delta.is_empty() => {
                                Some((Ok(delta), (inner, buf, true)))
                            }
                            Ok(_) => None,
                            Err(e) => Some((Err(e), (inner, buf, true))),
                        };
                    }
                }
            }
        },
    )
    .boxed()
}
