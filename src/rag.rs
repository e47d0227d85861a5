//! Retrieval-augmented generation over uploaded documents.
//!
//! # Ingestion
//!
//! ```text
//! upload ──▶ extension check ──▶ stage doc_<uuid><ext> ──▶ extract text
//!        ──▶ chunk (windows with overlap) ──▶ embed (one batch)
//!        ──▶ vector store add ──▶ registry row
//! ```
//!
//! An unsupported extension is rejected before anything is staged or
//! embedded. A document whose text is empty still gets a registry row with
//! zero chunks.
//!
//! # Query
//!
//! The question is embedded, the nearest `top_k` chunks are retrieved
//! (optionally within one document) and folded into a fixed prompt
//! template. With no chunks the bare question is sent unchanged.

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::documents;
use crate::error::{with_timeout, GatewayError, GatewayResult};
use crate::extract::{extract_text, DocumentKind, ExtractError};
use crate::models::{Document, GenerationMessage};
use crate::server::AppState;
use crate::vector_store::IndexedChunk;

pub struct DocumentUpload {
    pub filename: String,
    /// Display name overriding `filename` in the registry.
    pub name: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Serialize)]
pub struct IngestReport {
    pub doc_id: String,
    pub filename: String,
    pub chunks_created: usize,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct RagAnswer {
    pub message: String,
    pub context_used: bool,
    pub num_chunks: usize,
}

pub async fn ingest(state: &AppState, upload: DocumentUpload) -> GatewayResult<IngestReport> {
    let kind = DocumentKind::from_filename(&upload.filename).map_err(extract_error)?;
    state.services.embedder.availability()?;

    let doc_id = Uuid::new_v4().to_string();
    let filename = upload
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(&upload.filename)
        .to_string();

    let staged = state
        .media
        .stage_named("doc_", &upload.bytes, kind.extension())
        .await?;
    debug!(doc_id = %doc_id, file = %staged.file_name, "staged document");

    let bytes = upload.bytes;
    let text = tokio::task::spawn_blocking(move || extract_text(&bytes, kind))
        .await
        .map_err(|e| GatewayError::Internal(e.into()))?
        .map_err(extract_error)?;

    let chunking = &state.config.chunking;
    let chunks = chunk_text(&doc_id, &text, chunking.chunk_chars, chunking.overlap_chars);

    let chunks_created = chunks.len();
    if chunks.is_empty() {
        debug!(doc_id = %doc_id, "document has no text, registering without chunks");
    } else {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = with_timeout(
            "embedding",
            state.config.embedding.timeout_secs,
            state.services.embedder.embed(&texts),
        )
        .await?;
        if vectors.len() != chunks.len() {
            return Err(GatewayError::upstream(
                "embedding",
                format!("expected {} embeddings, got {}", chunks.len(), vectors.len()),
            ));
        }

        let indexed: Vec<IndexedChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| IndexedChunk {
                chunk,
                filename: filename.clone(),
                embedding,
            })
            .collect();
        state.vector_store.add(&indexed).await?;
    }

    documents::insert_document(
        &state.pool,
        &doc_id,
        &filename,
        chunks_created as i64,
        &staged.url,
    )
    .await?;
    info!(
        doc_id = %doc_id,
        chunks = chunks_created,
        embedder = state.services.embedder.model_name(),
        "document indexed"
    );

    Ok(IngestReport {
        doc_id,
        filename,
        chunks_created,
        message: if chunks_created == 0 {
            "Document uploaded, but no text was found to index".to_string()
        } else {
            "Document uploaded and indexed successfully".to_string()
        },
    })
}

pub async fn answer(
    state: &AppState,
    question: &str,
    doc_id: Option<&str>,
    model: &str,
) -> GatewayResult<RagAnswer> {
    state.services.embedder.availability()?;

    let query = with_timeout(
        "embedding",
        state.config.embedding.timeout_secs,
        state.services.embedder.embed_query(question),
    )
    .await?;
    let hits = state
        .vector_store
        .query(&query, state.config.retrieval.top_k, doc_id)
        .await?;
    debug!(hits = hits.len(), doc_id = ?doc_id, "retrieved context");

    let contexts: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
    let prompt = augment_prompt(question, &contexts);

    let reply = with_timeout(
        "generation",
        state.config.generation.timeout_secs,
        state
            .services
            .generator
            .chat(model, &[GenerationMessage::user(prompt)]),
    )
    .await?;

    Ok(RagAnswer {
        message: reply,
        context_used: !hits.is_empty(),
        num_chunks: hits.len(),
    })
}

pub async fn list(state: &AppState) -> GatewayResult<Vec<Document>> {
    documents::list_documents(&state.pool).await
}

/// Removes chunks, the registry row and the staged source file.
pub async fn delete(state: &AppState, doc_id: &str) -> GatewayResult<()> {
    let document = documents::get_document(&state.pool, doc_id).await?;
    let removed = state.vector_store.delete_document(doc_id).await?;
    documents::delete_document(&state.pool, doc_id).await?;
    state.media.remove_url(&document.source_path).await;
    if removed as i64 != document.chunk_count {
        warn!(doc_id, removed, expected = document.chunk_count, "chunk count mismatch on delete");
    }
    info!(doc_id, removed, "document deleted");
    Ok(())
}

/// Builds the prompt sent to the generator. Without context the question
/// is returned as is.
pub fn augment_prompt(question: &str, contexts: &[&str]) -> String {
    if contexts.is_empty() {
        return question.to_string();
    }
    let context = contexts
        .iter()
        .enumerate()
        .map(|(i, chunk)| format!("Context {}: {}", i + 1, chunk))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Based on the following context, answer the user's question. If the answer is not in context, say so.\n\nContext:\n{}\n\nUser Question: {}\n\nAnswer:",
        context, question
    )
}

fn extract_error(err: ExtractError) -> GatewayError {
    GatewayError::invalid(err.to_string())
}
