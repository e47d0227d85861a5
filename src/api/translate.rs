use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde::Deserialize;
use tracing::info;

use crate::error::{with_timeout, GatewayError, GatewayResult};
use crate::history::{self, HistoryKind};
use crate::models::{GenerationMessage, GenerationReply, TranslateHistory};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub text: String,
    pub target_lang: String,
    #[serde(default)]
    pub model: Option<String>,
}

pub fn translation_prompt(text: &str, target_lang: &str) -> String {
    format!(
        "Translate the following text to {}. Only provide the translated text, no explanations or introductory phrases.\n\nText: {}",
        target_lang, text
    )
}

pub async fn translate(
    State(state): State<AppState>,
    body: Result<Json<TranslateRequest>, JsonRejection>,
) -> GatewayResult<Json<GenerationReply>> {
    let Json(request) = body?;
    if request.text.trim().is_empty() {
        return Err(GatewayError::invalid("text must not be empty"));
    }
    if request.target_lang.trim().is_empty() {
        return Err(GatewayError::invalid("target_lang must not be empty"));
    }
    let model = request
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.config.generation.default_model.clone());

    let prompt = translation_prompt(&request.text, &request.target_lang);
    let translated = with_timeout(
        "generation",
        state.config.generation.timeout_secs,
        state
            .services
            .generator
            .chat(&model, &[GenerationMessage::user(prompt)]),
    )
    .await?;

    let row = history::insert_translate(
        &state.pool,
        &request.text,
        &request.target_lang,
        &translated,
        &model,
    )
    .await?;
    info!(history_id = row.id, target = %request.target_lang, "translation done");

    Ok(Json(GenerationReply::assistant(&model, translated)))
}

pub async fn list_history(
    State(state): State<AppState>,
) -> GatewayResult<Json<Vec<TranslateHistory>>> {
    Ok(Json(history::list(&state.pool, HistoryKind::Translate).await?))
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> GatewayResult<Json<TranslateHistory>> {
    Ok(Json(history::get(&state.pool, HistoryKind::Translate, id).await?))
}

pub async fn delete_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> GatewayResult<Json<serde_json::Value>> {
    super::delete_history_row(&state, HistoryKind::Translate, id).await
}
