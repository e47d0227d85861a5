//! Text chat: streamed completions and chat-session CRUD.
//!
//! `POST /chat` answers with a `text/plain` body of raw text deltas. When
//! the request did not name a session, a new one is created and the first
//! line of the body is `{"session_id":N}`. The upstream stream is opened
//! before the response starts, so connection and status errors still come
//! back as JSON errors with a proper status code.
//!
//! A spawned task drives the upstream stream to completion regardless of
//! the client connection and stores the assistant reply once the stream
//! ends. If the stream fails midway, a `{"error":"..."}` line is written
//! and no assistant message is stored.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::error::{with_timeout, GatewayError, GatewayResult};
use crate::generation::TextStream;
use crate::models::{ChatMessage, ChatSession, GenerationMessage, MessageBody, Role};
use crate::server::AppState;
use crate::sessions;

const STREAM_BUFFER: usize = 32;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<MessageBody>,
    #[serde(default)]
    pub session_id: Option<i64>,
}

pub async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> GatewayResult<Response> {
    let Json(request) = body?;
    if request.messages.is_empty() {
        return Err(GatewayError::invalid("messages must not be empty"));
    }
    let model = request
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.config.generation.default_model.clone());

    let existing = match request.session_id {
        Some(id) => Some(sessions::get_chat_session(&state.pool, id).await?.id),
        None => None,
    };

    let last_user = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.clone());
    let messages: Vec<GenerationMessage> =
        request.messages.into_iter().map(GenerationMessage::from).collect();

    let stream = with_timeout(
        "generation",
        state.config.generation.timeout_secs,
        state.services.generator.chat_stream(&model, &messages),
    )
    .await?;

    let (session_id, created) = match existing {
        Some(id) => (id, false),
        None => {
            let session = sessions::create_chat_session(&state.pool, None).await?;
            info!(session_id = session.id, "created chat session");
            (session.id, true)
        }
    };

    if let Some(content) = &last_user {
        sessions::add_chat_message(&state.pool, session_id, Role::User, content).await?;
        sessions::title_chat_session_if_default(&state.pool, session_id, content).await?;
    }

    let (tx, rx) = mpsc::channel::<Result<String, Infallible>>(STREAM_BUFFER);
    tokio::spawn(forward_stream(state, session_id, created, stream, tx));

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response())
}

async fn forward_stream(
    state: AppState,
    session_id: i64,
    created: bool,
    mut stream: TextStream,
    tx: mpsc::Sender<Result<String, Infallible>>,
) {
    let mut client_open = true;
    if created {
        let line = format!("{}\n", serde_json::json!({ "session_id": session_id }));
        client_open = tx.send(Ok(line)).await.is_ok();
    }

    let mut reply = String::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(delta) => {
                reply.push_str(&delta);
                if client_open && tx.send(Ok(delta)).await.is_err() {
                    debug!(session_id, "client disconnected, finishing stream server-side");
                    client_open = false;
                }
            }
            Err(e) => {
                warn!(session_id, "generation stream failed: {}", e);
                if client_open {
                    let line = format!("\n{}\n", serde_json::json!({ "error": e.to_string() }));
                    let _ = tx.send(Ok(line)).await;
                }
                return;
            }
        }
    }
    drop(tx);

    match sessions::add_chat_message(&state.pool, session_id, Role::Assistant, &reply).await {
        Ok(message) => debug!(session_id, message_id = message.id, "stored assistant reply"),
        Err(e) => warn!(session_id, "could not store assistant reply: {}", e),
    }
}

// ============ Sessions ============

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatSessionDetail {
    #[serde(flatten)]
    pub session: ChatSession,
    pub messages: Vec<ChatMessage>,
}

pub async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> GatewayResult<(StatusCode, Json<ChatSession>)> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let session = sessions::create_chat_session(&state.pool, request.title.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn list_sessions(State(state): State<AppState>) -> GatewayResult<Json<Vec<ChatSession>>> {
    Ok(Json(sessions::list_chat_sessions(&state.pool).await?))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> GatewayResult<Json<ChatSessionDetail>> {
    let session = sessions::get_chat_session(&state.pool, id).await?;
    let messages = sessions::chat_messages(&state.pool, id).await?;
    Ok(Json(ChatSessionDetail { session, messages }))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> GatewayResult<Json<serde_json::Value>> {
    sessions::delete_chat_session(&state.pool, id).await?;
    Ok(Json(serde_json::json!({ "message": "Session deleted successfully" })))
}
