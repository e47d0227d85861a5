//! Retrieval backends for RAG chunks.
//!
//! [`VectorStore`] holds chunk text with its embedding and answers
//! nearest-neighbour queries. Two backends exist:
//!
//! - [`SqliteVectorStore`] keeps vectors as BLOBs in the `rag_chunks` table
//!   and scores every stored vector with cosine similarity in Rust.
//! - [`ChromaStore`] talks to a Chroma server over its v1 HTTP API and keys
//!   each chunk by `<doc_id>_<chunk_index>` with `doc_id` metadata.

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{GatewayError, GatewayResult};
use crate::models::Chunk;

/// A chunk ready to be written, with its source filename and vector.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub filename: String,
    pub embedding: Vec<f32>,
}

/// A chunk returned by a similarity query, best first.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub doc_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub score: f64,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Writes chunks, replacing any with the same id.
    async fn add(&self, chunks: &[IndexedChunk]) -> GatewayResult<()>;

    /// Up to `top_k` chunks nearest to `query`, in descending similarity,
    /// optionally restricted to one document.
    async fn query(
        &self,
        query: &[f32],
        top_k: usize,
        doc_id: Option<&str>,
    ) -> GatewayResult<Vec<RetrievedChunk>>;

    /// Removes every chunk of a document; returns how many were removed.
    async fn delete_document(&self, doc_id: &str) -> GatewayResult<u64>;
}

// ============ SQLite ============

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn add(&self, chunks: &[IndexedChunk]) -> GatewayResult<()> {
        let mut tx = self.pool.begin().await?;

        for item in chunks {
            let metadata = serde_json::json!({
                "doc_id": item.chunk.document_id,
                "filename": item.filename,
                "chunk_index": item.chunk.chunk_index,
            })
            .to_string();

            sqlx::query(
                r#"
                INSERT INTO rag_chunks (id, doc_id, chunk_index, text, hash, metadata_json, dims, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    text = excluded.text,
                    hash = excluded.hash,
                    metadata_json = excluded.metadata_json,
                    dims = excluded.dims,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&item.chunk.id)
            .bind(&item.chunk.document_id)
            .bind(item.chunk.chunk_index)
            .bind(&item.chunk.text)
            .bind(&item.chunk.hash)
            .bind(&metadata)
            .bind(item.embedding.len() as i64)
            .bind(vec_to_blob(&item.embedding))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query(
        &self,
        query: &[f32],
        top_k: usize,
        doc_id: Option<&str>,
    ) -> GatewayResult<Vec<RetrievedChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT doc_id, chunk_index, text, embedding
            FROM rag_chunks
            WHERE dims = ? AND (? IS NULL OR doc_id = ?)
            "#,
        )
        .bind(query.len() as i64)
        .bind(doc_id)
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await?;

        let mut results: Vec<RetrievedChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                RetrievedChunk {
                    doc_id: row.get("doc_id"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    score: cosine_similarity(query, &vec) as f64,
                }
            })
            .collect();

        // Ties keep document order so results are deterministic.
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
                .then_with(|| a.chunk_index.cmp(&b.chunk_index))
        });
        results.truncate(top_k);
        debug!(hits = results.len(), top_k, "sqlite vector query");
        Ok(results)
    }

    async fn delete_document(&self, doc_id: &str) -> GatewayResult<u64> {
        let result = sqlx::query("DELETE FROM rag_chunks WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ============ Chroma ============

const SERVICE: &str = "vector store";
const CHROMA_TIMEOUT_SECS: u64 = 30;

pub struct ChromaStore {
    client: reqwest::Client,
    url: String,
    collection: String,
    collection_id: OnceCell<String>,
}

#[derive(Deserialize)]
struct CollectionResponse {
    id: String,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    documents: Vec<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Vec<Vec<Option<serde_json::Value>>>,
    #[serde(default)]
    distances: Vec<Vec<Option<f64>>>,
}

#[derive(Deserialize)]
struct GetResponse {
    #[serde(default)]
    ids: Vec<String>,
}

impl ChromaStore {
    pub fn new(config: &RetrievalConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(CHROMA_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            url: config.chroma_url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            collection_id: OnceCell::new(),
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> GatewayResult<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}{}", self.url, path))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(SERVICE, CHROMA_TIMEOUT_SECS, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::upstream(
                SERVICE,
                format!("Chroma API error {}: {}", status, text),
            ));
        }
        Ok(response)
    }

    /// Resolves the collection id once, creating the collection if needed.
    async fn collection_id(&self) -> GatewayResult<&str> {
        let id = self
            .collection_id
            .get_or_try_init(|| async {
                let response = self
                    .post(
                        "/api/v1/collections",
                        serde_json::json!({
                            "name": self.collection,
                            "get_or_create": true,
                            "metadata": {"hnsw:space": "cosine"},
                        }),
                    )
                    .await?;
                let parsed: CollectionResponse = response
                    .json()
                    .await
                    .map_err(|e| GatewayError::from_reqwest(SERVICE, CHROMA_TIMEOUT_SECS, e))?;
                debug!(collection = %self.collection, id = %parsed.id, "resolved chroma collection");
                Ok::<_, GatewayError>(parsed.id)
            })
            .await?;
        Ok(id.as_str())
    }
}

#[async_trait]
impl VectorStore for ChromaStore {
    async fn add(&self, chunks: &[IndexedChunk]) -> GatewayResult<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let id = self.collection_id().await?;

        let ids: Vec<&str> = chunks.iter().map(|c| c.chunk.id.as_str()).collect();
        let embeddings: Vec<&[f32]> = chunks.iter().map(|c| c.embedding.as_slice()).collect();
        let documents: Vec<&str> = chunks.iter().map(|c| c.chunk.text.as_str()).collect();
        let metadatas: Vec<serde_json::Value> = chunks
            .iter()
            .map(|c| {
                serde_json::json!({
                    "doc_id": c.chunk.document_id,
                    "filename": c.filename,
                    "chunk_index": c.chunk.chunk_index,
                })
            })
            .collect();

        self.post(
            &format!("/api/v1/collections/{}/upsert", id),
            serde_json::json!({
                "ids": ids,
                "embeddings": embeddings,
                "documents": documents,
                "metadatas": metadatas,
            }),
        )
        .await?;
        Ok(())
    }

    async fn query(
        &self,
        query: &[f32],
        top_k: usize,
        doc_id: Option<&str>,
    ) -> GatewayResult<Vec<RetrievedChunk>> {
        let id = self.collection_id().await?;
        let mut body = serde_json::json!({
            "query_embeddings": [query],
            "n_results": top_k,
            "include": ["documents", "metadatas", "distances"],
        });
        if let Some(doc_id) = doc_id {
            body["where"] = serde_json::json!({ "doc_id": doc_id });
        }
        let response = self
            .post(&format!("/api/v1/collections/{}/query", id), body)
            .await?;
        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::from_reqwest(SERVICE, CHROMA_TIMEOUT_SECS, e))?;
        Ok(parse_query_response(parsed))
    }

    async fn delete_document(&self, doc_id: &str) -> GatewayResult<u64> {
        let id = self.collection_id().await?;
        let filter = serde_json::json!({ "doc_id": doc_id });

        let existing: GetResponse = self
            .post(
                &format!("/api/v1/collections/{}/get", id),
                serde_json::json!({ "where": filter, "include": [] }),
            )
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::from_reqwest(SERVICE, CHROMA_TIMEOUT_SECS, e))?;
        if existing.ids.is_empty() {
            return Ok(0);
        }

        self.post(
            &format!("/api/v1/collections/{}/delete", id),
            serde_json::json!({ "where": filter }),
        )
        .await?;
        Ok(existing.ids.len() as u64)
    }
}

/// Flattens Chroma's per-query nested arrays for a single query.
/// Cosine distance becomes similarity as `1 - distance`.
fn parse_query_response(parsed: QueryResponse) -> Vec<RetrievedChunk> {
    let documents = parsed.documents.into_iter().next().unwrap_or_default();
    let metadatas = parsed.metadatas.into_iter().next().unwrap_or_default();
    let distances = parsed.distances.into_iter().next().unwrap_or_default();

    documents
        .into_iter()
        .enumerate()
        .filter_map(|(i, text)| {
            let text = text?;
            let meta = metadatas.get(i).cloned().flatten().unwrap_or_default();
            let distance = distances.get(i).copied().flatten().unwrap_or(1.0);
            Some(RetrievedChunk {
                doc_id: meta
                    .get("doc_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                chunk_index: meta.get("chunk_index").and_then(|v| v.as_i64()).unwrap_or(0),
                text,
                score: 1.0 - distance,
            })
        })
        .collect()
}
