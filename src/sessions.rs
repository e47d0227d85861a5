//! Chat and voice session persistence.
//!
//! Sessions own their messages; deleting a session cascades to its
//! messages through the foreign keys declared in the schema. Voice turns
//! are written together with the session title in one transaction so a
//! session never shows a title without its first message.

use sqlx::SqlitePool;

use crate::error::{GatewayError, GatewayResult};
use crate::models::{now_ts, title_prefix, ChatMessage, ChatSession, Role, VoiceMessage, VoiceSession};

pub const DEFAULT_CHAT_TITLE: &str = "New Chat";
pub const DEFAULT_VOICE_TITLE: &str = "Voice Conversation";
pub const TITLE_CHARS: usize = 50;

// ============ Text chat ============

pub async fn create_chat_session(pool: &SqlitePool, title: Option<&str>) -> GatewayResult<ChatSession> {
    let title = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_CHAT_TITLE);
    let created_at = now_ts();
    let id = sqlx::query("INSERT INTO chat_sessions (title, created_at) VALUES (?, ?)")
        .bind(title)
        .bind(created_at)
        .execute(pool)
        .await?
        .last_insert_rowid();
    Ok(ChatSession {
        id,
        title: title.to_string(),
        created_at,
    })
}

/// Newest first.
pub async fn list_chat_sessions(pool: &SqlitePool) -> GatewayResult<Vec<ChatSession>> {
    Ok(sqlx::query_as::<_, ChatSession>(
        "SELECT id, title, created_at FROM chat_sessions ORDER BY created_at DESC, id DESC",
    )
    .fetch_all(pool)
    .await?)
}

pub async fn get_chat_session(pool: &SqlitePool, id: i64) -> GatewayResult<ChatSession> {
    sqlx::query_as::<_, ChatSession>("SELECT id, title, created_at FROM chat_sessions WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| GatewayError::not_found(format!("Session {} not found", id)))
}

/// Oldest first.
pub async fn chat_messages(pool: &SqlitePool, session_id: i64) -> GatewayResult<Vec<ChatMessage>> {
    Ok(sqlx::query_as::<_, ChatMessage>(
        r#"
        SELECT id, session_id, role, content, created_at
        FROM chat_messages
        WHERE session_id = ?
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?)
}

pub async fn add_chat_message(
    pool: &SqlitePool,
    session_id: i64,
    role: Role,
    content: &str,
) -> GatewayResult<ChatMessage> {
    let created_at = now_ts();
    let id = sqlx::query(
        "INSERT INTO chat_messages (session_id, role, content, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(session_id)
    .bind(role.as_str())
    .bind(content)
    .bind(created_at)
    .execute(pool)
    .await?
    .last_insert_rowid();
    Ok(ChatMessage {
        id,
        session_id,
        role,
        content: content.to_string(),
        created_at,
    })
}

/// Renames a session that still carries the default title.
pub async fn title_chat_session_if_default(
    pool: &SqlitePool,
    session_id: i64,
    first_message: &str,
) -> GatewayResult<()> {
    let title = title_prefix(first_message.trim(), TITLE_CHARS);
    if title.is_empty() {
        return Ok(());
    }
    sqlx::query("UPDATE chat_sessions SET title = ? WHERE id = ? AND title = ?")
        .bind(&title)
        .bind(session_id)
        .bind(DEFAULT_CHAT_TITLE)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_chat_session(pool: &SqlitePool, id: i64) -> GatewayResult<()> {
    let result = sqlx::query("DELETE FROM chat_sessions WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(GatewayError::not_found(format!("Session {} not found", id)));
    }
    Ok(())
}

// ============ Voice chat ============

pub async fn create_voice_session(pool: &SqlitePool) -> GatewayResult<VoiceSession> {
    let created_at = now_ts();
    let id = sqlx::query("INSERT INTO voice_sessions (title, created_at) VALUES (?, ?)")
        .bind(DEFAULT_VOICE_TITLE)
        .bind(created_at)
        .execute(pool)
        .await?
        .last_insert_rowid();
    Ok(VoiceSession {
        id,
        title: DEFAULT_VOICE_TITLE.to_string(),
        created_at,
    })
}

pub async fn list_voice_sessions(pool: &SqlitePool) -> GatewayResult<Vec<VoiceSession>> {
    Ok(sqlx::query_as::<_, VoiceSession>(
        "SELECT id, title, created_at FROM voice_sessions ORDER BY created_at DESC, id DESC",
    )
    .fetch_all(pool)
    .await?)
}

pub async fn get_voice_session(pool: &SqlitePool, id: i64) -> GatewayResult<VoiceSession> {
    sqlx::query_as::<_, VoiceSession>("SELECT id, title, created_at FROM voice_sessions WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| GatewayError::not_found(format!("Voice session {} not found", id)))
}

pub async fn voice_messages(pool: &SqlitePool, session_id: i64) -> GatewayResult<Vec<VoiceMessage>> {
    Ok(sqlx::query_as::<_, VoiceMessage>(
        r#"
        SELECT id, session_id, user_audio_path, user_text, ai_text, ai_audio_path,
               language, language_probability, created_at
        FROM voice_messages
        WHERE session_id = ?
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?)
}

/// Fields of a completed voice turn.
#[derive(Debug, Clone)]
pub struct NewVoiceMessage {
    pub session_id: i64,
    pub user_audio_path: String,
    pub user_text: String,
    pub ai_text: String,
    pub ai_audio_path: String,
    pub language: Option<String>,
    pub language_probability: Option<f64>,
}

/// Inserts a voice turn. When it is the session's first message the
/// session title becomes the transcript prefix, in the same transaction.
pub async fn record_voice_turn(pool: &SqlitePool, turn: NewVoiceMessage) -> GatewayResult<VoiceMessage> {
    // Write first. Under WAL a deferred read cannot be upgraded to a write
    // once another connection has committed.
    let mut tx = pool.begin().await?;

    let created_at = now_ts();
    let id = sqlx::query(
        r#"
        INSERT INTO voice_messages (session_id, user_audio_path, user_text, ai_text,
                                    ai_audio_path, language, language_probability, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(turn.session_id)
    .bind(&turn.user_audio_path)
    .bind(&turn.user_text)
    .bind(&turn.ai_text)
    .bind(&turn.ai_audio_path)
    .bind(&turn.language)
    .bind(turn.language_probability)
    .bind(created_at)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    let title = title_prefix(&turn.user_text, TITLE_CHARS);
    sqlx::query(
        r#"
        UPDATE voice_sessions SET title = ?
        WHERE id = ? AND (SELECT COUNT(*) FROM voice_messages WHERE session_id = ?) = 1
        "#,
    )
    .bind(&title)
    .bind(turn.session_id)
    .bind(turn.session_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(VoiceMessage {
        id,
        session_id: turn.session_id,
        user_audio_path: turn.user_audio_path,
        user_text: turn.user_text,
        ai_text: turn.ai_text,
        ai_audio_path: turn.ai_audio_path,
        language: turn.language,
        language_probability: turn.language_probability,
        created_at,
    })
}

/// Deletes the session and returns the media urls its messages referenced.
pub async fn delete_voice_session(pool: &SqlitePool, id: i64) -> GatewayResult<Vec<String>> {
    let mut tx = pool.begin().await?;

    let urls: Vec<(String, String)> = sqlx::query_as(
        "DELETE FROM voice_messages WHERE session_id = ? RETURNING user_audio_path, ai_audio_path",
    )
    .bind(id)
    .fetch_all(&mut *tx)
    .await?;

    let result = sqlx::query("DELETE FROM voice_sessions WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(GatewayError::not_found(format!("Voice session {} not found", id)));
    }

    tx.commit().await?;
    Ok(urls.into_iter().flat_map(|(a, b)| [a, b]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate_pool;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    async fn memory_pool() -> SqlitePool {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .unwrap();
        migrate_pool(&pool).await.unwrap();
        pool
    }

    fn turn(session_id: i64, user_text: &str) -> NewVoiceMessage {
        NewVoiceMessage {
            session_id,
            user_audio_path: "/static/in.wav".into(),
            user_text: user_text.into(),
            ai_text: "reply".into(),
            ai_audio_path: "/static/out.wav".into(),
            language: Some("en".into()),
            language_probability: Some(0.9),
        }
    }

    #[tokio::test]
    async fn test_chat_session_cascade_delete() {
        let pool = memory_pool().await;
        let s = create_chat_session(&pool, None).await.unwrap();
        assert_eq!(s.title, DEFAULT_CHAT_TITLE);
        add_chat_message(&pool, s.id, Role::User, "hi").await.unwrap();
        add_chat_message(&pool, s.id, Role::Assistant, "hello").await.unwrap();

        let msgs = chat_messages(&pool, s.id).await.unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::User);
        assert_eq!(msgs[1].role, Role::Assistant);

        delete_chat_session(&pool, s.id).await.unwrap();
        assert!(chat_messages(&pool, s.id).await.unwrap().is_empty());
        assert!(matches!(
            get_chat_session(&pool, s.id).await,
            Err(GatewayError::NotFound(_))
        ));
        assert!(delete_chat_session(&pool, s.id).await.is_err());
    }

    #[tokio::test]
    async fn test_chat_title_only_replaces_default() {
        let pool = memory_pool().await;
        let s = create_chat_session(&pool, None).await.unwrap();
        title_chat_session_if_default(&pool, s.id, &"x".repeat(80)).await.unwrap();
        let renamed = get_chat_session(&pool, s.id).await.unwrap();
        assert_eq!(renamed.title.chars().count(), TITLE_CHARS);

        title_chat_session_if_default(&pool, s.id, "something else").await.unwrap();
        assert_eq!(get_chat_session(&pool, s.id).await.unwrap().title, renamed.title);

        let named = create_chat_session(&pool, Some("Trip plans")).await.unwrap();
        title_chat_session_if_default(&pool, named.id, "hello").await.unwrap();
        assert_eq!(get_chat_session(&pool, named.id).await.unwrap().title, "Trip plans");
    }

    #[tokio::test]
    async fn test_first_voice_turn_sets_title() {
        let pool = memory_pool().await;
        let s = create_voice_session(&pool).await.unwrap();
        assert_eq!(s.title, DEFAULT_VOICE_TITLE);

        let long = "a".repeat(70);
        record_voice_turn(&pool, turn(s.id, &long)).await.unwrap();
        let after_first = get_voice_session(&pool, s.id).await.unwrap();
        assert_eq!(after_first.title, "a".repeat(50));

        record_voice_turn(&pool, turn(s.id, "second question")).await.unwrap();
        assert_eq!(get_voice_session(&pool, s.id).await.unwrap().title, after_first.title);
        assert_eq!(voice_messages(&pool, s.id).await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_voice_turns_survive_concurrent_writes() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = crate::config::Config::rooted_at(dir.path());
        let pool = crate::db::connect(&config).await.unwrap();
        migrate_pool(&pool).await.unwrap();

        let chat = create_chat_session(&pool, None).await.unwrap();
        let mut voice_ids = Vec::new();
        for _ in 0..4 {
            voice_ids.push(create_voice_session(&pool).await.unwrap().id);
        }

        let mut tasks = Vec::new();
        for round in 0..100 {
            let pool = pool.clone();
            let voice_id = voice_ids[round % voice_ids.len()];
            let chat_id = chat.id;
            tasks.push(tokio::spawn(async move {
                let (turn_result, chat_result, history_result) = tokio::join!(
                    record_voice_turn(&pool, turn(voice_id, "hello")),
                    add_chat_message(&pool, chat_id, Role::User, "ping"),
                    crate::history::insert_translate(&pool, "hi", "French", "salut", "m"),
                );
                turn_result.map(|_| ())?;
                chat_result.map(|_| ())?;
                history_result.map(|_| ())
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let mut total = 0;
        for id in voice_ids {
            let messages = voice_messages(&pool, id).await.unwrap();
            assert_eq!(get_voice_session(&pool, id).await.unwrap().title, "hello");
            total += messages.len();
        }
        assert_eq!(total, 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_voice_session_delete_survives_concurrent_writes() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = crate::config::Config::rooted_at(dir.path());
        let pool = crate::db::connect(&config).await.unwrap();
        migrate_pool(&pool).await.unwrap();
        let chat = create_chat_session(&pool, None).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..40 {
            let pool = pool.clone();
            let chat_id = chat.id;
            tasks.push(tokio::spawn(async move {
                let s = create_voice_session(&pool).await?;
                record_voice_turn(&pool, turn(s.id, "hi")).await?;
                let (deleted, added) = tokio::join!(
                    delete_voice_session(&pool, s.id),
                    add_chat_message(&pool, chat_id, Role::User, "ping"),
                );
                added?;
                deleted
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().len(), 2);
        }
        assert!(list_voice_sessions(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_voice_session_returns_media() {
        let pool = memory_pool().await;
        let s = create_voice_session(&pool).await.unwrap();
        record_voice_turn(&pool, turn(s.id, "hi")).await.unwrap();

        let urls = delete_voice_session(&pool, s.id).await.unwrap();
        assert_eq!(urls, vec!["/static/in.wav".to_string(), "/static/out.wav".to_string()]);
        assert!(voice_messages(&pool, s.id).await.unwrap().is_empty());
        assert!(matches!(
            delete_voice_session(&pool, s.id).await,
            Err(GatewayError::NotFound(_))
        ));
    }
}
