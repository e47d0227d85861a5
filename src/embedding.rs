//! Embedding providers and vector utilities.
//!
//! - **[`OllamaEmbedder`]** calls `POST /api/embed` on a local Ollama.
//! - **[`OpenAIEmbedder`]** calls an OpenAI-compatible `/v1/embeddings`.
//! - **[`DisabledEmbedder`]** fails every call; RAG endpoints then answer 503.
//!
//! # Retry Strategy
//!
//! Both HTTP providers share one retry loop, governed by
//! `embedding.max_retries` (default `0`, i.e. a single attempt):
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::{GatewayError, GatewayResult};

const SERVICE: &str = "embedding";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "nomic-embed-text";

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"nomic-embed-text"`).
    fn model_name(&self) -> &str;

    fn availability(&self) -> GatewayResult<()> {
        Ok(())
    }

    /// Embeds a batch, returning one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> GatewayResult<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> GatewayResult<Vec<f32>> {
        let results = self.embed(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::upstream(SERVICE, "Empty embedding response"))
    }
}

// ============ Disabled Provider ============

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn availability(&self) -> GatewayResult<()> {
        Err(GatewayError::unavailable("Embedding provider is disabled"))
    }

    async fn embed(&self, _texts: &[String]) -> GatewayResult<Vec<Vec<f32>>> {
        Err(GatewayError::unavailable("Embedding provider is disabled"))
    }
}

// ============ Shared HTTP plumbing ============

struct HttpEmbeddingClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    max_retries: u32,
    timeout_secs: u64,
    label: &'static str,
}

impl HttpEmbeddingClient {
    fn new(
        config: &EmbeddingConfig,
        endpoint: String,
        api_key: Option<String>,
        label: &'static str,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
            label,
        })
    }

    async fn post(&self, body: &serde_json::Value) -> GatewayResult<serde_json::Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                warn!(attempt, delay_secs = delay.as_secs(), "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(&self.endpoint).json(body);
            if let Some(key) = &self.api_key {
                request = request.header("Authorization", format!("Bearer {}", key));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.json().await.map_err(|e| {
                            GatewayError::from_reqwest(SERVICE, self.timeout_secs, e)
                        });
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = GatewayError::upstream(
                        SERVICE,
                        format!("{} API error {}: {}", self.label, status, body_text),
                    );

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(GatewayError::from_reqwest(SERVICE, self.timeout_secs, e));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| GatewayError::upstream(SERVICE, "Embedding failed after retries")))
    }
}

// ============ Ollama Provider ============

pub struct OllamaEmbedder {
    model: String,
    http: HttpEmbeddingClient,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let url = config
            .url
            .as_deref()
            .unwrap_or(DEFAULT_OLLAMA_URL)
            .trim_end_matches('/');
        let http = HttpEmbeddingClient::new(config, format!("{}/api/embed", url), None, "Ollama")?;
        Ok(Self { model, http })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> GatewayResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(model = %self.model, batch = texts.len(), "embedding batch");
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = self.http.post(&body).await?;
        let vectors = parse_ollama_response(&json)?;
        check_count(texts.len(), vectors.len())?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> GatewayResult<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            GatewayError::upstream(SERVICE, "Invalid Ollama response: missing embeddings array")
        })?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding.as_array().map(|a| to_f32(a)).ok_or_else(|| {
                GatewayError::upstream(SERVICE, "Invalid Ollama response: embedding is not an array")
            })
        })
        .collect()
}

// ============ OpenAI Provider ============

/// Requires `OPENAI_API_KEY` in the environment.
pub struct OpenAIEmbedder {
    model: String,
    http: HttpEmbeddingClient,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .as_deref()
            .unwrap_or(DEFAULT_OPENAI_URL)
            .trim_end_matches('/');
        let http = HttpEmbeddingClient::new(
            config,
            format!("{}/embeddings", url),
            Some(api_key),
            "OpenAI",
        )?;
        Ok(Self { model, http })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> GatewayResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(model = %self.model, batch = texts.len(), "embedding batch");
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = self.http.post(&body).await?;
        let vectors = parse_openai_response(&json)?;
        check_count(texts.len(), vectors.len())?;
        Ok(vectors)
    }
}

/// Extracts `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> GatewayResult<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| GatewayError::upstream(SERVICE, "Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                GatewayError::upstream(SERVICE, "Invalid OpenAI response: missing embedding")
            })?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, to_f32(embedding)));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn to_f32(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

fn check_count(expected: usize, got: usize) -> GatewayResult<()> {
    if expected != got {
        return Err(GatewayError::upstream(
            SERVICE,
            format!("expected {} embeddings, got {}", expected, got),
        ));
    }
    Ok(())
}

/// Builds the provider named by `embedding.provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledEmbedder)),
        "ollama" => Ok(Box::new(OllamaEmbedder::new(config)?)),
        "openai" => Ok(Box::new(OpenAIEmbedder::new(config)?)),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Reverses [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-norm input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
