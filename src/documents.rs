//! Registry of ingested RAG documents.

use sqlx::SqlitePool;

use crate::error::{GatewayError, GatewayResult};
use crate::models::{now_ts, Document};

pub async fn insert_document(
    pool: &SqlitePool,
    doc_id: &str,
    filename: &str,
    chunk_count: i64,
    source_path: &str,
) -> GatewayResult<Document> {
    let created_at = now_ts();
    sqlx::query(
        r#"
        INSERT INTO rag_documents (doc_id, filename, chunk_count, source_path, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(doc_id)
    .bind(filename)
    .bind(chunk_count)
    .bind(source_path)
    .bind(created_at)
    .execute(pool)
    .await?;

    Ok(Document {
        doc_id: doc_id.to_string(),
        filename: filename.to_string(),
        chunk_count,
        source_path: source_path.to_string(),
        created_at,
    })
}

pub async fn list_documents(pool: &SqlitePool) -> GatewayResult<Vec<Document>> {
    Ok(sqlx::query_as::<_, Document>(
        r#"
        SELECT doc_id, filename, chunk_count, source_path, created_at
        FROM rag_documents
        ORDER BY created_at DESC, doc_id ASC
        "#,
    )
    .fetch_all(pool)
    .await?)
}

pub async fn get_document(pool: &SqlitePool, doc_id: &str) -> GatewayResult<Document> {
    sqlx::query_as::<_, Document>(
        "SELECT doc_id, filename, chunk_count, source_path, created_at FROM rag_documents WHERE doc_id = ?",
    )
    .bind(doc_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| GatewayError::not_found(format!("Document {} not found", doc_id)))
}

pub async fn delete_document(pool: &SqlitePool, doc_id: &str) -> GatewayResult<()> {
    let result = sqlx::query("DELETE FROM rag_documents WHERE doc_id = ?")
        .bind(doc_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(GatewayError::not_found(format!("Document {} not found", doc_id)));
    }
    Ok(())
}
