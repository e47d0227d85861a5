//! TOML configuration for the gateway.
//!
//! Every section except `[db]` and `[media]` has defaults, so a minimal
//! config only names where the database and media artifacts live. See
//! `config/gateway.example.toml` for the full set of keys.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub media: MediaConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long a writer waits for the database lock before giving up.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    5
}
fn default_busy_timeout() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    pub dir: PathBuf,
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,
}

fn default_url_prefix() -> String {
    "/static".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

/// Ollama-compatible chat server used for chat, vision, translation, RAG
/// answers and voice replies.
#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            default_model: default_model(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "llama3.2-vision:latest".to_string()
}
fn default_generation_timeout() -> u64 {
    300
}

/// OpenAI-compatible `/audio/transcriptions` server (faster-whisper).
#[derive(Debug, Deserialize, Clone)]
pub struct TranscriptionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_transcription_url")]
    pub url: String,
    #[serde(default = "default_transcription_model")]
    pub model: String,
    #[serde(default = "default_audio_timeout")]
    pub timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_transcription_url(),
            model: default_transcription_model(),
            timeout_secs: default_audio_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_transcription_url() -> String {
    "http://localhost:8001/v1".to_string()
}
fn default_transcription_model() -> String {
    "Systran/faster-whisper-tiny".to_string()
}
fn default_audio_timeout() -> u64 {
    120
}

/// OpenAI-compatible `/audio/speech` server (Kokoro).
#[derive(Debug, Deserialize, Clone)]
pub struct SynthesisConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_synthesis_url")]
    pub url: String,
    #[serde(default = "default_synthesis_model")]
    pub model: String,
    #[serde(default = "default_voice")]
    pub default_voice: String,
    #[serde(default = "default_voices")]
    pub voices: Vec<String>,
    #[serde(default = "default_audio_timeout")]
    pub timeout_secs: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_synthesis_url(),
            model: default_synthesis_model(),
            default_voice: default_voice(),
            voices: default_voices(),
            timeout_secs: default_audio_timeout(),
        }
    }
}

fn default_synthesis_url() -> String {
    "http://localhost:8880/v1".to_string()
}
fn default_synthesis_model() -> String {
    "kokoro".to_string()
}
fn default_voice() -> String {
    "af_sarah".to_string()
}
fn default_voices() -> Vec<String> {
    ["af_sarah", "af_bella", "af_nicole", "af_sky", "am_adam", "am_michael"]
        .iter()
        .map(|v| v.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: Some("nomic-embed-text".to_string()),
            url: None,
            max_retries: 0,
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_embedding_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_store")]
    pub store: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_chroma_url")]
    pub chroma_url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            store: default_store(),
            top_k: default_top_k(),
            chroma_url: default_chroma_url(),
            collection: default_collection(),
        }
    }
}

fn default_store() -> String {
    "sqlite".to_string()
}
fn default_top_k() -> usize {
    3
}
fn default_chroma_url() -> String {
    "http://localhost:8002".to_string()
}
fn default_collection() -> String {
    "documents".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_chars: default_chunk_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_chunk_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    200
}

impl Config {
    /// A config rooted at `dir` with every other section defaulted.
    pub fn rooted_at(dir: &Path) -> Self {
        Self {
            db: DbConfig {
                path: dir.join("gateway.sqlite"),
                max_connections: default_max_connections(),
                busy_timeout_secs: default_busy_timeout(),
            },
            media: MediaConfig {
                dir: dir.join("static"),
                url_prefix: default_url_prefix(),
            },
            server: ServerConfig::default(),
            generation: GenerationConfig::default(),
            transcription: TranscriptionConfig::default(),
            synthesis: SynthesisConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            chunking: ChunkingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_chars == 0 {
        anyhow::bail!("chunking.chunk_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.chunk_chars {
        anyhow::bail!("chunking.overlap_chars must be smaller than chunking.chunk_chars");
    }

    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be >= 1");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if !config.media.url_prefix.starts_with('/') || config.media.url_prefix.len() < 2 {
        anyhow::bail!("media.url_prefix must be an absolute path such as '/static'");
    }

    match config.retrieval.store.as_str() {
        "sqlite" | "chroma" => {}
        other => anyhow::bail!(
            "Unknown retrieval store: '{}'. Must be sqlite or chroma.",
            other
        ),
    }

    match config.embedding.provider.as_str() {
        "disabled" | "ollama" => {}
        "openai" => {
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be specified when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, ollama, or openai.",
            other
        ),
    }

    Ok(())
}
