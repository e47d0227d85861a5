use axum::{
    extract::{multipart::MultipartRejection, Multipart, Path, State},
    Json,
};

use super::FormData;
use crate::error::GatewayResult;
use crate::models::VoiceSession;
use crate::server::AppState;
use crate::voice::{self, VoiceSessionDetail, VoiceTurnRequest, VoiceTurnResponse};

/// Multipart `audio_file`, optional `session_id`, `voice`, `model`, `speed`.
pub async fn chat(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> GatewayResult<Json<VoiceTurnResponse>> {
    // Engine availability is checked before the upload is read.
    state.services.transcriber.availability()?;
    state.services.synthesizer.availability()?;

    let mut form = FormData::read(multipart).await?;
    let audio = form.file("audio_file")?;
    let request = VoiceTurnRequest {
        audio: audio.bytes,
        filename: audio.filename,
        session_id: form.parsed::<i64>("session_id")?,
        voice: form.text("voice"),
        model: form.text("model"),
        speed: Some(super::speech_speed(form.parsed::<f64>("speed")?)?),
    };
    Ok(Json(voice::run_turn(&state, request).await?))
}

pub async fn list_sessions(State(state): State<AppState>) -> GatewayResult<Json<Vec<VoiceSession>>> {
    Ok(Json(voice::list_sessions(&state).await?))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> GatewayResult<Json<VoiceSessionDetail>> {
    Ok(Json(voice::get_session(&state, id).await?))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> GatewayResult<Json<serde_json::Value>> {
    voice::delete_session(&state, id).await?;
    Ok(Json(serde_json::json!({ "message": "Voice session deleted successfully" })))
}
