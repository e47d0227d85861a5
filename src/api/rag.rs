use axum::{
    extract::{multipart::MultipartRejection, rejection::JsonRejection, Multipart, Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::FormData;
use crate::error::{GatewayError, GatewayResult};
use crate::models::Document;
use crate::rag::{self, DocumentUpload, IngestReport, RagAnswer};
use crate::server::AppState;

/// Multipart `file`, optional `name`.
pub async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> GatewayResult<Json<IngestReport>> {
    let mut form = FormData::read(multipart).await?;
    let file = form.file("file")?;
    let report = rag::ingest(
        &state,
        DocumentUpload {
            filename: file.filename,
            name: form.text("name"),
            bytes: file.bytes,
        },
    )
    .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct RagChatRequest {
    pub message: String,
    #[serde(default)]
    pub doc_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

pub async fn chat(
    State(state): State<AppState>,
    body: Result<Json<RagChatRequest>, JsonRejection>,
) -> GatewayResult<Json<RagAnswer>> {
    let Json(request) = body?;
    if request.message.trim().is_empty() {
        return Err(GatewayError::invalid("message must not be empty"));
    }
    let model = request
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.config.generation.default_model.clone());
    let doc_id = request.doc_id.as_deref().filter(|d| !d.is_empty());

    Ok(Json(rag::answer(&state, &request.message, doc_id, &model).await?))
}

#[derive(Serialize)]
pub struct DocumentList {
    pub documents: Vec<Document>,
}

pub async fn list_documents(State(state): State<AppState>) -> GatewayResult<Json<DocumentList>> {
    Ok(Json(DocumentList {
        documents: rag::list(&state).await?,
    }))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> GatewayResult<Json<serde_json::Value>> {
    rag::delete(&state, &doc_id).await?;
    Ok(Json(serde_json::json!({ "message": "Document deleted successfully" })))
}
