//! Core data models: persisted rows and the messages exchanged with the
//! generation service.
//!
//! Rows carry `created_at` as Unix seconds and serialize it as an ISO-8601
//! UTC string.

use serde::{Deserialize, Serialize, Serializer};

/// Speaker of a chat message. Alternation is not enforced here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl TryFrom<String> for Role {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => anyhow::bail!("unknown message role: {}", other),
        }
    }
}

/// One message sent to the generation service.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationMessage {
    pub role: Role,
    pub content: String,
    /// Raw image bytes for vision-capable models.
    pub images: Vec<Vec<u8>>,
}

impl GenerationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn with_image(mut self, bytes: Vec<u8>) -> Self {
        self.images.push(bytes);
        self
    }
}

/// The `{role, content}` pair used in request and response bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBody {
    pub role: Role,
    pub content: String,
}

impl From<MessageBody> for GenerationMessage {
    fn from(body: MessageBody) -> Self {
        Self {
            role: body.role,
            content: body.content,
            images: Vec::new(),
        }
    }
}

/// Reply shape shared by vision and translation: `{model, message:{role, content}}`.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationReply {
    pub model: String,
    pub message: MessageBody,
}

impl GenerationReply {
    pub fn assistant(model: &str, content: String) -> Self {
        Self {
            model: model.to_string(),
            message: MessageBody {
                role: Role::Assistant,
                content,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChatSession {
    pub id: i64,
    pub title: String,
    #[serde(serialize_with = "ts_iso")]
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: i64,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub content: String,
    #[serde(serialize_with = "ts_iso")]
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct VoiceSession {
    pub id: i64,
    pub title: String,
    #[serde(serialize_with = "ts_iso")]
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct VoiceMessage {
    pub id: i64,
    pub session_id: i64,
    pub user_audio_path: String,
    pub user_text: String,
    pub ai_text: String,
    pub ai_audio_path: String,
    pub language: Option<String>,
    pub language_probability: Option<f64>,
    #[serde(serialize_with = "ts_iso")]
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct VisionHistory {
    pub id: i64,
    pub image_path: String,
    pub prompt: String,
    pub response: String,
    pub model: String,
    #[serde(serialize_with = "ts_iso")]
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TtsHistory {
    pub id: i64,
    pub text: String,
    pub voice: String,
    pub speed: f64,
    pub audio_path: String,
    #[serde(serialize_with = "ts_iso")]
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SttHistory {
    pub id: i64,
    pub audio_path: String,
    pub transcript: String,
    pub language: Option<String>,
    pub language_probability: Option<f64>,
    #[serde(serialize_with = "ts_iso")]
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TranslateHistory {
    pub id: i64,
    pub source_text: String,
    pub target_language: String,
    pub translated_text: String,
    pub model: String,
    #[serde(serialize_with = "ts_iso")]
    pub created_at: i64,
}

/// Registry entry for an ingested RAG document.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Document {
    pub doc_id: String,
    pub filename: String,
    pub chunk_count: i64,
    pub source_path: String,
    #[serde(serialize_with = "ts_iso")]
    pub created_at: i64,
}

/// A text window cut from a document body.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn ts_iso<S: Serializer>(ts: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_ts_iso(*ts))
}

/// First `max_chars` characters of `text`, used for session titles.
pub fn title_prefix(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
