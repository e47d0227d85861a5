//! Single-stage history records: vision, TTS, STT and translation.
//!
//! Each table has its own insert; listing, lookup and deletion are shared
//! and keyed by [`HistoryKind`]. Deleting a row hands back the media URL it
//! referenced so the caller can remove the file.

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, SqlitePool};

use crate::error::{GatewayError, GatewayResult};
use crate::models::{now_ts, SttHistory, TranslateHistory, TtsHistory, VisionHistory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    Vision,
    Tts,
    Stt,
    Translate,
}

impl HistoryKind {
    fn table(&self) -> &'static str {
        match self {
            HistoryKind::Vision => "vision_history",
            HistoryKind::Tts => "tts_history",
            HistoryKind::Stt => "stt_history",
            HistoryKind::Translate => "translate_history",
        }
    }

    /// Column holding a staged media URL, if the table has one.
    fn media_column(&self) -> Option<&'static str> {
        match self {
            HistoryKind::Vision => Some("image_path"),
            HistoryKind::Tts | HistoryKind::Stt => Some("audio_path"),
            HistoryKind::Translate => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            HistoryKind::Vision => "Vision",
            HistoryKind::Tts => "TTS",
            HistoryKind::Stt => "STT",
            HistoryKind::Translate => "Translation",
        }
    }
}

/// Newest first.
pub async fn list<T>(pool: &SqlitePool, kind: HistoryKind) -> GatewayResult<Vec<T>>
where
    T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
{
    let sql = format!(
        "SELECT * FROM {} ORDER BY created_at DESC, id DESC",
        kind.table()
    );
    Ok(sqlx::query_as::<_, T>(&sql).fetch_all(pool).await?)
}

pub async fn get<T>(pool: &SqlitePool, kind: HistoryKind, id: i64) -> GatewayResult<T>
where
    T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
{
    let sql = format!("SELECT * FROM {} WHERE id = ?", kind.table());
    sqlx::query_as::<_, T>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| not_found(kind, id))
}

/// Deletes a row and returns its media URL, if any.
pub async fn delete(pool: &SqlitePool, kind: HistoryKind, id: i64) -> GatewayResult<Option<String>> {
    match kind.media_column() {
        Some(column) => {
            let sql = format!("DELETE FROM {} WHERE id = ? RETURNING {}", kind.table(), column);
            let url: Option<String> = sqlx::query_scalar(&sql)
                .bind(id)
                .fetch_optional(pool)
                .await?;
            url.map(Some).ok_or_else(|| not_found(kind, id))
        }
        None => {
            let sql = format!("DELETE FROM {} WHERE id = ?", kind.table());
            let result = sqlx::query(&sql).bind(id).execute(pool).await?;
            if result.rows_affected() == 0 {
                return Err(not_found(kind, id));
            }
            Ok(None)
        }
    }
}

fn not_found(kind: HistoryKind, id: i64) -> GatewayError {
    GatewayError::not_found(format!("{} history {} not found", kind.label(), id))
}

// ============ Inserts ============

pub async fn insert_vision(
    pool: &SqlitePool,
    image_path: &str,
    prompt: &str,
    response: &str,
    model: &str,
) -> GatewayResult<VisionHistory> {
    let created_at = now_ts();
    let id = sqlx::query(
        "INSERT INTO vision_history (image_path, prompt, response, model, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(image_path)
    .bind(prompt)
    .bind(response)
    .bind(model)
    .bind(created_at)
    .execute(pool)
    .await?
    .last_insert_rowid();
    Ok(VisionHistory {
        id,
        image_path: image_path.to_string(),
        prompt: prompt.to_string(),
        response: response.to_string(),
        model: model.to_string(),
        created_at,
    })
}

pub async fn insert_tts(
    pool: &SqlitePool,
    text: &str,
    voice: &str,
    speed: f64,
    audio_path: &str,
) -> GatewayResult<TtsHistory> {
    let created_at = now_ts();
    let id = sqlx::query(
        "INSERT INTO tts_history (text, voice, speed, audio_path, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(text)
    .bind(voice)
    .bind(speed)
    .bind(audio_path)
    .bind(created_at)
    .execute(pool)
    .await?
    .last_insert_rowid();
    Ok(TtsHistory {
        id,
        text: text.to_string(),
        voice: voice.to_string(),
        speed,
        audio_path: audio_path.to_string(),
        created_at,
    })
}

pub async fn insert_stt(
    pool: &SqlitePool,
    audio_path: &str,
    transcript: &str,
    language: Option<&str>,
    language_probability: Option<f64>,
) -> GatewayResult<SttHistory> {
    let created_at = now_ts();
    let id = sqlx::query(
        r#"
        INSERT INTO stt_history (audio_path, transcript, language, language_probability, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(audio_path)
    .bind(transcript)
    .bind(language)
    .bind(language_probability)
    .bind(created_at)
    .execute(pool)
    .await?
    .last_insert_rowid();
    Ok(SttHistory {
        id,
        audio_path: audio_path.to_string(),
        transcript: transcript.to_string(),
        language: language.map(String::from),
        language_probability,
        created_at,
    })
}

pub async fn insert_translate(
    pool: &SqlitePool,
    source_text: &str,
    target_language: &str,
    translated_text: &str,
    model: &str,
) -> GatewayResult<TranslateHistory> {
    let created_at = now_ts();
    let id = sqlx::query(
        r#"
        INSERT INTO translate_history (source_text, target_language, translated_text, model, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(source_text)
    .bind(target_language)
    .bind(translated_text)
    .bind(model)
    .bind(created_at)
    .execute(pool)
    .await?
    .last_insert_rowid();
    Ok(TranslateHistory {
        id,
        source_text: source_text.to_string(),
        target_language: target_language.to_string(),
        translated_text: translated_text.to_string(),
        model: model.to_string(),
        created_at,
    })
}
