//! Voice chat: audio in, transcript and reply out, reply audio staged.
//!
//! ```text
//! availability ──▶ session ──▶ stage input ──▶ transcribe ──▶ generate
//!              ──▶ synthesize ──▶ stage reply ──▶ record turn (tx)
//! ```
//!
//! Every stage depends on the previous one. The turn row is written only
//! once all engines succeeded; an earlier failure leaves the session (if it
//! was created here) and any staged audio behind, but no message.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{with_timeout, GatewayError, GatewayResult};
use crate::extract::file_extension;
use crate::models::{GenerationMessage, VoiceMessage, VoiceSession};
use crate::server::AppState;
use crate::sessions::{self, NewVoiceMessage};

pub struct VoiceTurnRequest {
    pub audio: Vec<u8>,
    pub filename: String,
    pub session_id: Option<i64>,
    pub voice: Option<String>,
    pub model: Option<String>,
    pub speed: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct VoiceTurnResponse {
    pub session_id: i64,
    pub message_id: i64,
    pub user_text: String,
    pub ai_text: String,
    pub audio_url: String,
    pub user_audio_url: String,
    pub language: Option<String>,
    pub language_probability: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct VoiceSessionDetail {
    #[serde(flatten)]
    pub session: VoiceSession,
    pub messages: Vec<VoiceMessage>,
}

pub async fn run_turn(state: &AppState, request: VoiceTurnRequest) -> GatewayResult<VoiceTurnResponse> {
    let services = &state.services;
    let config = &state.config;

    services.transcriber.availability()?;
    services.synthesizer.availability()?;

    let session_id = match request.session_id {
        Some(id) => sessions::get_voice_session(&state.pool, id).await?.id,
        None => {
            let session = sessions::create_voice_session(&state.pool).await?;
            info!(session_id = session.id, "created voice session");
            session.id
        }
    };

    let ext = match file_extension(&request.filename) {
        e if e.is_empty() => ".wav".to_string(),
        e => e,
    };
    let user_audio = state.media.stage(&request.audio, &ext).await?;
    debug!(session_id, file = %user_audio.file_name, "staged voice input");

    let transcript = with_timeout(
        "transcription",
        config.transcription.timeout_secs,
        services.transcriber.transcribe(request.audio, &request.filename),
    )
    .await?;
    if transcript.text.trim().is_empty() {
        return Err(GatewayError::invalid("Could not understand audio"));
    }
    debug!(session_id, language = ?transcript.language, "transcribed voice input");

    let model = request
        .model
        .unwrap_or_else(|| config.generation.default_model.clone());
    let ai_text = with_timeout(
        "generation",
        config.generation.timeout_secs,
        services
            .generator
            .chat(&model, &[GenerationMessage::user(transcript.text.clone())]),
    )
    .await?;

    let voice = request
        .voice
        .unwrap_or_else(|| services.synthesizer.default_voice().to_string());
    let speed = request.speed.unwrap_or(1.0);
    let waveform = match with_timeout(
        "synthesis",
        config.synthesis.timeout_secs,
        services.synthesizer.synthesize(&ai_text, &voice, speed),
    )
    .await
    {
        Ok(w) => w,
        Err(e) => {
            warn!(session_id, reply_chars = ai_text.chars().count(), "synthesis failed, reply not stored: {}", e);
            return Err(e);
        }
    };
    let reply_audio = state.media.stage(&waveform.bytes, ".wav").await?;

    let message = sessions::record_voice_turn(
        &state.pool,
        NewVoiceMessage {
            session_id,
            user_audio_path: user_audio.url,
            user_text: transcript.text,
            ai_text,
            ai_audio_path: reply_audio.url,
            language: transcript.language,
            language_probability: transcript.language_probability,
        },
    )
    .await?;
    info!(session_id, message_id = message.id, "voice turn recorded");

    Ok(VoiceTurnResponse {
        session_id,
        message_id: message.id,
        user_text: message.user_text,
        ai_text: message.ai_text,
        audio_url: message.ai_audio_path,
        user_audio_url: message.user_audio_path,
        language: message.language,
        language_probability: message.language_probability,
    })
}

pub async fn list_sessions(state: &AppState) -> GatewayResult<Vec<VoiceSession>> {
    sessions::list_voice_sessions(&state.pool).await
}

pub async fn get_session(state: &AppState, id: i64) -> GatewayResult<VoiceSessionDetail> {
    let session = sessions::get_voice_session(&state.pool, id).await?;
    let messages = sessions::voice_messages(&state.pool, id).await?;
    Ok(VoiceSessionDetail { session, messages })
}

/// Deletes the session with its messages, then their audio files.
pub async fn delete_session(state: &AppState, id: i64) -> GatewayResult<()> {
    let urls = sessions::delete_voice_session(&state.pool, id).await?;
    for url in &urls {
        state.media.remove_url(url).await;
    }
    info!(session_id = id, files = urls.len(), "voice session deleted");
    Ok(())
}
