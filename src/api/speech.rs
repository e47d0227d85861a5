//! Text-to-speech and speech-to-text endpoints with their history.

use axum::{
    extract::{multipart::MultipartRejection, rejection::JsonRejection, Multipart, Path, State},
    http::{header, HeaderName},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::FormData;
use crate::error::{with_timeout, GatewayError, GatewayResult};
use crate::extract::file_extension;
use crate::history::{self, HistoryKind};
use crate::models::{SttHistory, TtsHistory};
use crate::server::AppState;

// ============ TTS ============

#[derive(Debug, Deserialize)]
pub struct TtsRequest {
    pub text: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub speed: Option<f64>,
}

/// Returns the WAV bytes. The staged copy's URL and, when the WAV header
/// is readable, the clip duration travel in `X-` headers.
pub async fn synthesize(
    State(state): State<AppState>,
    body: Result<Json<TtsRequest>, JsonRejection>,
) -> GatewayResult<Response> {
    let Json(request) = body?;
    let synthesizer = &state.services.synthesizer;
    synthesizer.availability()?;

    if request.text.trim().is_empty() {
        return Err(GatewayError::invalid("text must not be empty"));
    }
    let speed = super::speech_speed(request.speed)?;
    let voice = request
        .voice
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| synthesizer.default_voice().to_string());

    let waveform = with_timeout(
        "synthesis",
        state.config.synthesis.timeout_secs,
        synthesizer.synthesize(&request.text, &voice, speed),
    )
    .await?;
    let staged = state.media.stage(&waveform.bytes, ".wav").await?;
    let row = history::insert_tts(&state.pool, &request.text, &voice, speed, &staged.url).await?;
    info!(history_id = row.id, voice = %voice, bytes = waveform.bytes.len(), "speech synthesized");

    let duration = waveform
        .info()
        .map(|i| format!("{:.2}", i.duration_secs))
        .unwrap_or_default();

    Ok((
        [
            (header::CONTENT_TYPE, "audio/wav".to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"speech.wav\"".to_string(),
            ),
            (HeaderName::from_static("x-audio-url"), staged.url),
            (HeaderName::from_static("x-audio-duration-secs"), duration),
            (
                header::ACCESS_CONTROL_EXPOSE_HEADERS,
                "X-Audio-Url, X-Audio-Duration-Secs".to_string(),
            ),
        ],
        waveform.bytes,
    )
        .into_response())
}

#[derive(Serialize)]
pub struct VoicesResponse {
    pub voices: Vec<String>,
    pub default: String,
}

pub async fn voices(State(state): State<AppState>) -> Json<VoicesResponse> {
    let synthesizer = &state.services.synthesizer;
    Json(VoicesResponse {
        voices: synthesizer.voices(),
        default: synthesizer.default_voice().to_string(),
    })
}

pub async fn list_tts_history(State(state): State<AppState>) -> GatewayResult<Json<Vec<TtsHistory>>> {
    Ok(Json(history::list(&state.pool, HistoryKind::Tts).await?))
}

pub async fn get_tts_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> GatewayResult<Json<TtsHistory>> {
    Ok(Json(history::get(&state.pool, HistoryKind::Tts, id).await?))
}

pub async fn delete_tts_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> GatewayResult<Json<serde_json::Value>> {
    super::delete_history_row(&state, HistoryKind::Tts, id).await
}

// ============ STT ============

#[derive(Debug, Serialize)]
pub struct SttResponse {
    pub id: i64,
    pub text: String,
    pub language: Option<String>,
    pub language_probability: Option<f64>,
    pub audio_url: String,
}

/// Multipart `file`.
pub async fn transcribe(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> GatewayResult<Json<SttResponse>> {
    state.services.transcriber.availability()?;
    let mut form = FormData::read(multipart).await?;
    let audio = form.file("file")?;

    let ext = match file_extension(&audio.filename) {
        e if e.is_empty() => ".wav".to_string(),
        e => e,
    };
    let staged = state.media.stage(&audio.bytes, &ext).await?;

    let transcript = with_timeout(
        "transcription",
        state.config.transcription.timeout_secs,
        state
            .services
            .transcriber
            .transcribe(audio.bytes, &audio.filename),
    )
    .await?;

    let row = history::insert_stt(
        &state.pool,
        &staged.url,
        &transcript.text,
        transcript.language.as_deref(),
        transcript.language_probability,
    )
    .await?;
    info!(history_id = row.id, language = ?row.language, "audio transcribed");

    Ok(Json(SttResponse {
        id: row.id,
        text: row.transcript,
        language: row.language,
        language_probability: row.language_probability,
        audio_url: row.audio_path,
    }))
}

pub async fn list_stt_history(State(state): State<AppState>) -> GatewayResult<Json<Vec<SttHistory>>> {
    Ok(Json(history::list(&state.pool, HistoryKind::Stt).await?))
}

pub async fn get_stt_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> GatewayResult<Json<SttHistory>> {
    Ok(Json(history::get(&state.pool, HistoryKind::Stt, id).await?))
}

pub async fn delete_stt_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> GatewayResult<Json<serde_json::Value>> {
    super::delete_history_row(&state, HistoryKind::Stt, id).await
}
