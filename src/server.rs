//! HTTP server for the gateway.
//!
//! Builds the engine clients once from config, wires them into an axum
//! [`Router`] through [`AppState`], and serves the media directory under
//! the configured URL prefix.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/models` | Models on the generation server |
//! | `POST` | `/chat` | Streamed chat completion |
//! | `POST`/`GET` | `/chat/sessions` | Create / list chat sessions |
//! | `GET`/`DELETE` | `/chat/sessions/{id}` | Session with messages / delete |
//! | `POST` | `/vision` | Describe an uploaded image |
//! | `GET`  | `/vision/models` | Same as `/models` |
//! | `POST` | `/tts` | Synthesize speech, returns `audio/wav` |
//! | `GET`  | `/tts/voices` | Available voices |
//! | `POST` | `/stt` | Transcribe uploaded audio |
//! | `POST` | `/translate` | Translate text |
//! | `GET`/`DELETE` | `/{vision,tts,stt,translate}/history[/{id}]` | History |
//! | `POST` | `/rag/upload` | Ingest a PDF/TXT/MD document |
//! | `POST` | `/rag/chat` | Retrieval-augmented answer |
//! | `GET`  | `/rag/documents` | Registry listing |
//! | `DELETE` | `/rag/documents/{doc_id}` | Delete a document |
//! | `POST` | `/voice/chat` | Audio in, audio out |
//! | `GET`/`DELETE` | `/voice/sessions[/{id}]` | Voice sessions |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "Unsupported file type: .xlsx" } }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted for browser clients.

use axum::{
    extract::{DefaultBodyLimit, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api;
use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{with_timeout, GatewayResult};
use crate::generation::{Generator, OllamaGenerator};
use crate::media::MediaStore;
use crate::migrate::migrate_pool;
use crate::synthesis::{DisabledSynthesizer, HttpSynthesizer, Synthesizer};
use crate::transcription::{DisabledTranscriber, HttpTranscriber, Transcriber};
use crate::vector_store::{ChromaStore, SqliteVectorStore, VectorStore};

/// Engine clients, built once and shared by every request.
#[derive(Clone)]
pub struct Services {
    pub generator: Arc<dyn Generator>,
    pub transcriber: Arc<dyn Transcriber>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub embedder: Arc<dyn Embedder>,
}

impl Services {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let transcriber: Arc<dyn Transcriber> = if config.transcription.enabled {
            Arc::new(HttpTranscriber::new(&config.transcription)?)
        } else {
            Arc::new(DisabledTranscriber)
        };

        let synthesizer: Arc<dyn Synthesizer> = if config.synthesis.enabled {
            Arc::new(HttpSynthesizer::new(&config.synthesis)?)
        } else {
            Arc::new(DisabledSynthesizer::new(&config.synthesis))
        };

        Ok(Self {
            generator: Arc::new(OllamaGenerator::new(&config.generation)?),
            transcriber,
            synthesizer,
            embedder: Arc::from(create_embedder(&config.embedding)?),
        })
    }
}

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub media: MediaStore,
    pub services: Services,
    pub vector_store: Arc<dyn VectorStore>,
}

impl AppState {
    /// Opens the database, applies the schema and prepares the media
    /// directory. The vector store backend follows `[retrieval] store`.
    pub async fn new(config: &Config, services: Services) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate_pool(&pool).await?;
        let media = MediaStore::new(&config.media)?;

        let vector_store: Arc<dyn VectorStore> = match config.retrieval.store.as_str() {
            "chroma" => Arc::new(ChromaStore::new(&config.retrieval)?),
            _ => Arc::new(SqliteVectorStore::new(pool.clone())),
        };

        Ok(Self {
            config: Arc::new(config.clone()),
            pool,
            media,
            services,
            vector_store,
        })
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let static_files = ServeDir::new(state.media.dir());
    let prefix = state.media.url_prefix().to_string();
    let body_limit = state.config.server.max_upload_bytes;

    Router::new()
        .route("/health", get(handle_health))
        .route("/models", get(handle_models))
        // Text chat
        .route("/chat", post(api::chat::chat))
        .route(
            "/chat/sessions",
            post(api::chat::create_session).get(api::chat::list_sessions),
        )
        .route(
            "/chat/sessions/{id}",
            get(api::chat::get_session).delete(api::chat::delete_session),
        )
        // Vision
        .route("/vision", post(api::vision::describe))
        .route("/vision/models", get(handle_models))
        .route("/vision/history", get(api::vision::list_history))
        .route(
            "/vision/history/{id}",
            get(api::vision::get_history).delete(api::vision::delete_history),
        )
        // Speech
        .route("/tts", post(api::speech::synthesize))
        .route("/tts/voices", get(api::speech::voices))
        .route("/tts/history", get(api::speech::list_tts_history))
        .route(
            "/tts/history/{id}",
            get(api::speech::get_tts_history).delete(api::speech::delete_tts_history),
        )
        .route("/stt", post(api::speech::transcribe))
        .route("/stt/history", get(api::speech::list_stt_history))
        .route(
            "/stt/history/{id}",
            get(api::speech::get_stt_history).delete(api::speech::delete_stt_history),
        )
        // Translation
        .route("/translate", post(api::translate::translate))
        .route("/translate/history", get(api::translate::list_history))
        .route(
            "/translate/history/{id}",
            get(api::translate::get_history).delete(api::translate::delete_history),
        )
        // RAG
        .route("/rag/upload", post(api::rag::upload))
        .route("/rag/chat", post(api::rag::chat))
        .route("/rag/documents", get(api::rag::list_documents))
        .route("/rag/documents/{doc_id}", delete(api::rag::delete_document))
        // Voice chat
        .route("/voice/chat", post(api::voice::chat))
        .route("/voice/sessions", get(api::voice::list_sessions))
        .route(
            "/voice/sessions/{id}",
            get(api::voice::get_session).delete(api::voice::delete_session),
        )
        .nest_service(&prefix, static_files)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the gateway with engine clients built from config.
///
/// Binds to `[server].bind` and serves until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Services::from_config(config)?;
    run_server_with_services(config, services).await
}

/// Like [`run_server`] with caller-supplied engine clients.
pub async fn run_server_with_services(config: &Config, services: Services) -> anyhow::Result<()> {
    let state = AppState::new(config, services).await?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(addr = %listener.local_addr()?, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install Ctrl-C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_models(State(state): State<AppState>) -> GatewayResult<Json<serde_json::Value>> {
    let models = with_timeout(
        "generation",
        state.config.generation.timeout_secs,
        state.services.generator.list_models(),
    )
    .await?;
    Ok(Json(models))
}
