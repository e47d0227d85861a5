//! Image description through a vision-capable generation model.

use axum::{
    extract::{multipart::MultipartRejection, Multipart, Path, State},
    Json,
};
use tracing::info;

use super::FormData;
use crate::error::{with_timeout, GatewayResult};
use crate::extract::file_extension;
use crate::history::{self, HistoryKind};
use crate::models::{GenerationMessage, GenerationReply, VisionHistory};
use crate::server::AppState;

const DEFAULT_PROMPT: &str = "Describe this image";

/// Multipart `file`, `prompt`, `model`.
pub async fn describe(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> GatewayResult<Json<GenerationReply>> {
    let mut form = FormData::read(multipart).await?;
    let image = form.file("file")?;
    let prompt = form.text("prompt").unwrap_or_else(|| DEFAULT_PROMPT.to_string());
    let model = form
        .text("model")
        .unwrap_or_else(|| state.config.generation.default_model.clone());

    let ext = match file_extension(&image.filename) {
        e if e.is_empty() => ".png".to_string(),
        e => e,
    };
    let staged = state.media.stage(&image.bytes, &ext).await?;

    let message = GenerationMessage::user(prompt.clone()).with_image(image.bytes);
    let reply = with_timeout(
        "generation",
        state.config.generation.timeout_secs,
        state.services.generator.chat(&model, &[message]),
    )
    .await?;

    let row = history::insert_vision(&state.pool, &staged.url, &prompt, &reply, &model).await?;
    info!(history_id = row.id, model = %model, "vision request answered");

    Ok(Json(GenerationReply::assistant(&model, reply)))
}

pub async fn list_history(State(state): State<AppState>) -> GatewayResult<Json<Vec<VisionHistory>>> {
    Ok(Json(history::list(&state.pool, HistoryKind::Vision).await?))
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> GatewayResult<Json<VisionHistory>> {
    Ok(Json(history::get(&state.pool, HistoryKind::Vision, id).await?))
}

pub async fn delete_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> GatewayResult<Json<serde_json::Value>> {
    super::delete_history_row(&state, HistoryKind::Vision, id).await
}
